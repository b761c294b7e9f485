//! Payment deep links and bilingual WhatsApp bodies for a bill.
//!
//! Nothing is sent from here: the dashboard opens `whatsapp_url` on the
//! owner's device.

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::services::billing::{number_field, outstanding_amount, parse_billing_month};

const WHATSAPP_BASE_URL: &str = "https://wa.me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    Invoice,
    Reminder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareBundle {
    pub payment_link: Option<String>,
    pub message: String,
    pub whatsapp_url: Option<String>,
}

/// `upi://pay?pa=<vpa>&pn=<name>&am=<amount>&cu=<currency>`. Needs both a
/// payee address and a payee name.
pub fn upi_payment_link(
    scheme: &str,
    payee_address: Option<&str>,
    payee_name: Option<&str>,
    amount: f64,
    currency: &str,
) -> Option<String> {
    let payee_address = non_empty(payee_address)?;
    let payee_name = non_empty(payee_name)?;
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }

    let mut link = Url::parse(&format!("{scheme}://pay")).ok()?;
    link.query_pairs_mut()
        .append_pair("pa", payee_address)
        .append_pair("pn", payee_name)
        .append_pair("am", &format!("{amount:.2}"))
        .append_pair("cu", currency);

    // Form encoding writes spaces as '+'; UPI apps expect %20. A literal '+'
    // is already %2B at this point.
    Some(link.as_str().replace('+', "%20"))
}

/// `https://wa.me/<digits>?text=<message>`; `None` when the phone has no
/// digits.
pub fn whatsapp_url(phone: Option<&str>, message: &str) -> Option<String> {
    let digits = phone
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if digits.is_empty() {
        return None;
    }

    let mut url = Url::parse(&format!("{WHATSAPP_BASE_URL}/{digits}")).ok()?;
    url.query_pairs_mut().append_pair("text", message);
    Some(url.as_str().replace('+', "%20"))
}

pub fn invoice_message(
    tenant_name: &str,
    month_label: &str,
    amount: &str,
    payment_link: Option<&str>,
) -> String {
    let mut message = String::from("*Rent Invoice / किराया चालान*\n\n");
    message.push_str(&format!(
        "Hi {tenant_name}, your rent for {month_label} is {amount}.\n"
    ));
    message.push_str(&format!(
        "नमस्ते {tenant_name}, {month_label} के लिए आपका किराया {amount} है।\n\n"
    ));
    if let Some(link) = payment_link {
        message.push_str(&format!("*Pay Now / अभी भुगतान करें:* {link}\n\n"));
    }
    message.push_str("Thank you! / धन्यवाद!");
    message
}

pub fn reminder_message(
    tenant_name: &str,
    month_label: &str,
    amount: &str,
    upi_id: Option<&str>,
    payment_link: Option<&str>,
) -> String {
    let mut message = String::from("*Payment Reminder / भुगतान अनुस्मारक*\n\n");
    message.push_str(&format!(
        "Hi {tenant_name}, this is a friendly reminder that your payment of *{amount}* for {month_label} is pending.\n\n"
    ));
    message.push_str(&format!(
        "नमस्ते {tenant_name}, यह एक रिमाइंडर है कि {month_label} के लिए आपका *{amount}* का भुगतान अभी बाकी है।\n\n"
    ));
    if let Some(upi_id) = upi_id {
        message.push_str(&format!(
            "Please pay using UPI: *{upi_id}* or scan the QR in the invoice sent earlier.\n"
        ));
        message.push_str(&format!(
            "कृपया UPI: *{upi_id}* या पहले भेजे गए चालान में QR का उपयोग करके भुगतान करें।\n\n"
        ));
    }
    if let Some(link) = payment_link {
        message.push_str(&format!("*Pay Now / अभी भुगतान करें:* {link}\n\n"));
    }
    message.push_str("Ignore if already paid. / यदि पहले ही भुगतान कर दिया है तो अनदेखा करें।");
    message
}

/// Builds the share payload from stored rows. Reminders ask for what is
/// still outstanding; invoices for the full total.
pub fn share_bundle(
    kind: ShareKind,
    bill: &Value,
    tenant: &Value,
    owner: Option<&Value>,
    scheme: &str,
    currency: &str,
) -> ShareBundle {
    let total = number_field(bill, "total_amount").unwrap_or(0.0);
    let amount = match kind {
        ShareKind::Invoice => total,
        ShareKind::Reminder => match outstanding_amount(bill) {
            remaining if remaining > 0.0 => remaining,
            _ => total,
        },
    };

    let tenant_name = text_field(Some(tenant), "name").unwrap_or("there");
    let month_label = month_label(text_field(Some(bill), "billing_month").unwrap_or_default());
    let amount_label = format_amount(amount, currency);
    let upi_id = text_field(owner, "upi_id");

    let payment_link = upi_payment_link(
        scheme,
        upi_id,
        text_field(owner, "full_name"),
        amount,
        currency,
    );

    let message = match kind {
        ShareKind::Invoice => invoice_message(
            tenant_name,
            &month_label,
            &amount_label,
            payment_link.as_deref(),
        ),
        ShareKind::Reminder => reminder_message(
            tenant_name,
            &month_label,
            &amount_label,
            upi_id,
            payment_link.as_deref(),
        ),
    };
    let whatsapp_url = whatsapp_url(text_field(Some(tenant), "phone"), &message);

    ShareBundle {
        payment_link,
        message,
        whatsapp_url,
    }
}

/// `2026-03` reads as `March 2026`; anything unparseable is shown verbatim.
pub fn month_label(billing_month: &str) -> String {
    parse_billing_month(billing_month)
        .map(|(start, _)| start.format("%B %Y").to_string())
        .unwrap_or_else(|_| billing_month.trim().to_string())
}

pub fn format_amount(amount: f64, currency: &str) -> String {
    let number = if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    };
    if currency.eq_ignore_ascii_case("INR") {
        format!("₹{number}")
    } else {
        format!("{} {number}", currency.to_ascii_uppercase())
    }
}

fn text_field<'a>(row: Option<&'a Value>, key: &str) -> Option<&'a str> {
    row.and_then(Value::as_object)
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        format_amount, invoice_message, month_label, share_bundle, upi_payment_link,
        whatsapp_url, ShareKind,
    };

    #[test]
    fn builds_upi_link_with_encoded_fields() {
        let link = upi_payment_link("upi", Some("ravi@okaxis"), Some("Ravi Kumar"), 9200.0, "INR")
            .expect("link");
        assert_eq!(
            link,
            "upi://pay?pa=ravi%40okaxis&pn=Ravi%20Kumar&am=9200.00&cu=INR"
        );
    }

    #[test]
    fn upi_link_needs_payee_address_and_name() {
        assert!(upi_payment_link("upi", None, Some("Ravi"), 10.0, "INR").is_none());
        assert!(upi_payment_link("upi", Some("ravi@okaxis"), Some("  "), 10.0, "INR").is_none());
        assert!(upi_payment_link("upi", Some("ravi@okaxis"), Some("Ravi"), f64::NAN, "INR").is_none());
    }

    #[test]
    fn whatsapp_url_keeps_only_phone_digits() {
        let url = whatsapp_url(Some("+91 98765-43210"), "Hi there").expect("url");
        assert_eq!(url, "https://wa.me/919876543210?text=Hi%20there");
        assert!(whatsapp_url(Some("n/a"), "Hi").is_none());
        assert!(whatsapp_url(None, "Hi").is_none());
    }

    #[test]
    fn invoice_message_is_bilingual() {
        let message = invoice_message("Asha", "March 2026", "₹9200", Some("upi://pay?x"));
        assert!(message.starts_with("*Rent Invoice / किराया चालान*"));
        assert!(message.contains("Hi Asha, your rent for March 2026 is ₹9200."));
        assert!(message.contains("नमस्ते Asha, March 2026 के लिए आपका किराया ₹9200 है।"));
        assert!(message.contains("*Pay Now / अभी भुगतान करें:* upi://pay?x"));
        assert!(message.ends_with("Thank you! / धन्यवाद!"));

        let without_link = invoice_message("Asha", "March 2026", "₹9200", None);
        assert!(!without_link.contains("Pay Now"));
    }

    #[test]
    fn formats_amounts_and_months() {
        assert_eq!(format_amount(9200.0, "INR"), "₹9200");
        assert_eq!(format_amount(4200.5, "INR"), "₹4200.50");
        assert_eq!(format_amount(12.0, "usd"), "USD 12");
        assert_eq!(month_label("2026-03"), "March 2026");
        assert_eq!(month_label("March"), "March");
    }

    #[test]
    fn reminder_asks_for_outstanding_remainder() {
        let bill = json!({
            "billing_month": "2026-03",
            "status": "Partial",
            "total_amount": 9200,
            "paid_amount": 5000
        });
        let tenant = json!({"name": "Asha", "phone": "9876543210"});
        let owner = json!({"full_name": "Ravi Kumar", "upi_id": "ravi@okaxis"});

        let bundle = share_bundle(ShareKind::Reminder, &bill, &tenant, Some(&owner), "upi", "INR");
        assert!(bundle.message.contains("*₹4200*"));
        assert!(bundle.message.contains("Please pay using UPI: *ravi@okaxis*"));
        assert_eq!(
            bundle.payment_link.as_deref(),
            Some("upi://pay?pa=ravi%40okaxis&pn=Ravi%20Kumar&am=4200.00&cu=INR")
        );
        let url = bundle.whatsapp_url.expect("phone present");
        assert!(url.starts_with("https://wa.me/9876543210?text="));

        let invoice = share_bundle(ShareKind::Invoice, &bill, &tenant, Some(&owner), "upi", "INR");
        assert!(invoice.message.contains("₹9200"));
    }

    #[test]
    fn share_without_owner_profile_has_no_link() {
        let bill = json!({"billing_month": "2026-03", "status": "Due", "total_amount": 9200});
        let tenant = json!({"name": "Asha"});
        let bundle = share_bundle(ShareKind::Invoice, &bill, &tenant, None, "upi", "INR");
        assert!(bundle.payment_link.is_none());
        assert!(bundle.whatsapp_url.is_none());
        assert!(bundle.message.contains("Hi Asha"));
    }
}
