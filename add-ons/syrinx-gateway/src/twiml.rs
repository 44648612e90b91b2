//! Dial-plan XML responses.
//!
//! Two tiny fixed documents, built by hand: the inbound plan (optional
//! voicemail dial, then connect the media stream) and the forward plan
//! (dial the forwarding number). Values are XML-escaped.

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Inbound dial plan: optional voicemail `<Dial>`, then
/// `<Connect><Stream/></Connect>` pointing at the media endpoint.
pub fn dial_plan(voicemail_number: &str, stream_url: &str) -> String {
    let mut body = String::new();
    if !voicemail_number.is_empty() {
        body.push_str(&format!(
            "<Dial><Number>{}</Number></Dial>",
            xml_escape(voicemail_number)
        ));
    }
    body.push_str(&format!(
        "<Connect><Stream url=\"{}\"/></Connect>",
        xml_escape(stream_url)
    ));
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{body}</Response>")
}

/// Forward plan: dial the requested number.
pub fn forward_plan(forwarding_number: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Dial><Number>{}</Number></Dial></Response>",
        xml_escape(forwarding_number)
    )
}
