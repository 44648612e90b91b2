//! Language tags the streaming ASR accepts, with display names.

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub static LANGUAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("bg", "Bulgarian"),
        ("ca", "Catalan"),
        ("zh", "Chinese (Mandarin, Simplified)"),
        ("zh-CN", "Chinese (Mandarin, Simplified)"),
        ("zh-Hans", "Chinese (Mandarin, Simplified)"),
        ("zh-TW", "Chinese (Mandarin, Traditional)"),
        ("zh-Hant", "Chinese (Mandarin, Traditional)"),
        ("cs", "Czech"),
        ("da", "Danish"),
        ("da-DK", "Danish"),
        ("nl", "Dutch"),
        ("en", "English"),
        ("en-US", "English"),
        ("en-AU", "English"),
        ("en-GB", "English"),
        ("en-NZ", "English"),
        ("en-IN", "English"),
        ("et", "Estonian"),
        ("fi", "Finnish"),
        ("nl-BE", "Flemish"),
        ("fr", "French"),
        ("fr-CA", "French"),
        ("de", "German"),
        ("de-CH", "German (Switzerland)"),
        ("el", "Greek"),
        ("hi", "Hindi"),
        ("hu", "Hungarian"),
        ("id", "Indonesian"),
        ("it", "Italian"),
        ("ja", "Japanese"),
        ("ko", "Korean"),
        ("ko-KR", "Korean"),
        ("lv", "Latvian"),
        ("lt", "Lithuanian"),
        ("ms", "Malay"),
        ("no", "Norwegian"),
        ("pl", "Polish"),
        ("pt", "Portuguese"),
        ("pt-BR", "Portuguese"),
        ("ro", "Romanian"),
        ("ru", "Russian"),
        ("sk", "Slovak"),
        ("es", "Spanish"),
        ("es-419", "Spanish"),
        ("es-ES", "Spanish"),
        ("sv", "Swedish"),
        ("sv-SE", "Swedish"),
        ("th", "Thai"),
        ("th-TH", "Thai"),
        ("tr", "Turkish"),
        ("uk", "Ukrainian"),
        ("vi", "Vietnamese"),
    ])
});

pub fn is_supported(tag: &str) -> bool {
    LANGUAGES.contains_key(tag)
}

pub fn display_name(tag: &str) -> Option<&'static str> {
    LANGUAGES.get(tag).copied()
}

/// Language the ASR should run with: the agent's tag when supported,
/// otherwise US English.
pub fn asr_language(tag: &str) -> &str {
    if !tag.is_empty() && is_supported(tag) {
        tag
    } else {
        "en-US"
    }
}
