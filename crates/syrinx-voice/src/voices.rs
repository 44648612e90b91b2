//! Voice catalogue: which synthesis vendor serves which voice id.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// ElevenLabs voices, friendly id → vendor voice id.
pub static ELEVENLABS_VOICES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("rachel", "21m00Tcm4TlvDq8ikWAM"),
        ("domi", "AZnzlk1XvdvUeBnXmlld"),
        ("bella", "EXAVITQu4vr4xnSDxMaL"),
        ("antoni", "ErXwobaYiN019PkySvjV"),
        ("josh", "TxGEqnHWrfWFTfGW9XjX"),
        ("adam", "pNInz6obpgDQGcFmaJgB"),
        ("sam", "yoZ06aMxZJJ28mfd3POQ"),
    ])
});

/// Cartesia voices, friendly id → vendor voice id.
pub static CARTESIA_VOICES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("barbershop-man", "a0e99841-438c-4a64-b679-ae501e7d6091"),
        ("british-lady", "79a125e8-cd45-4c13-8a67-188112f4dd22"),
        ("newsman", "d46abd1d-2d02-43e8-819f-51fb652c1c61"),
        ("sweet-lady", "e3827ec5-697a-4b7c-9704-1a23041bbc51"),
        ("spanish-narrator", "2deb3edf-b9d8-4d06-8db9-5742fb8a3cb2"),
    ])
});

pub fn is_elevenlabs(voice_id: &str) -> bool {
    ELEVENLABS_VOICES.contains_key(voice_id)
}

pub fn is_cartesia(voice_id: &str) -> bool {
    CARTESIA_VOICES.contains_key(voice_id)
}

pub fn elevenlabs_voice(voice_id: &str) -> Option<&'static str> {
    ELEVENLABS_VOICES.get(voice_id).copied()
}

pub fn cartesia_voice(voice_id: &str) -> Option<&'static str> {
    CARTESIA_VOICES.get(voice_id).copied()
}

/// Cartesia's multilingual model takes a two-letter code; anything it
/// does not cover falls back to English.
pub fn cartesia_language(tag: &str) -> &'static str {
    match tag.split('-').next().unwrap_or("") {
        "es" => "es",
        "fr" => "fr",
        "de" => "de",
        "pt" => "pt",
        "zh" => "zh",
        "ja" => "ja",
        _ => "en",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_families_are_disjoint() {
        for id in ELEVENLABS_VOICES.keys() {
            assert!(!is_cartesia(id));
        }
        for id in CARTESIA_VOICES.keys() {
            assert!(!is_elevenlabs(id));
        }
        assert!(!is_elevenlabs("no-such-voice"));
    }

    #[test]
    fn cartesia_language_mapping() {
        assert_eq!(cartesia_language("es-ES"), "es");
        assert_eq!(cartesia_language("pt-BR"), "pt");
        assert_eq!(cartesia_language("ja-JP"), "ja");
        assert_eq!(cartesia_language("en-US"), "en");
        assert_eq!(cartesia_language("ko-KR"), "en");
        assert_eq!(cartesia_language(""), "en");
    }
}
