//! Deterministic fallback content. No I/O, cannot fail.

/// Default subject, also used when generated text has no `Subject:` line.
pub fn default_subject(business_name: &str) -> String {
    format!("Website Solutions for {business_name}")
}

/// Three-line body: hook, value proposition, call to action.
pub fn render_body(business_name: &str, category: &str, city: &str, sender_name: &str) -> String {
    format!(
        "Hi {business_name} team,\n\n\
         I came across your {category} business in {city} and wanted to reach out.\n\
         We build fast, SEO-ready websites that help {category} businesses win more local customers.\n\
         Would you be open to a quick 15-minute call this week to see if we can help?\n\n\
         Best regards,\n\
         {sender_name}"
    )
}
