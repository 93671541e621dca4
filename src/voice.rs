//! Speaking-style detection and SSML assembly.
//!
//! The synthesis call itself is an external concern; this module prepares its
//! input: a reasoning call classifies the reply's emotional tone into a fixed
//! style set, and the SSML builder wraps the text in the matching prosody or
//! express-as document.

use tracing::warn;

use crate::llm::LlmClient;

/// The speaking styles the classifier may pick. Anything else degrades to
/// [`SpeechStyle::Friendly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechStyle {
    Cheerful,
    Sad,
    Angry,
    Excited,
    Friendly,
    Empathetic,
    Hopeful,
    Unfriendly,
    Shouting,
    Whispering,
    Assistant,
    Newscast,
    Customerservice,
    NarrationProfessional,
    NarrationRelaxed,
}

impl SpeechStyle {
    pub const ALL: [SpeechStyle; 15] = [
        SpeechStyle::Cheerful,
        SpeechStyle::Sad,
        SpeechStyle::Angry,
        SpeechStyle::Excited,
        SpeechStyle::Friendly,
        SpeechStyle::Empathetic,
        SpeechStyle::Hopeful,
        SpeechStyle::Unfriendly,
        SpeechStyle::Shouting,
        SpeechStyle::Whispering,
        SpeechStyle::Assistant,
        SpeechStyle::Newscast,
        SpeechStyle::Customerservice,
        SpeechStyle::NarrationProfessional,
        SpeechStyle::NarrationRelaxed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechStyle::Cheerful => "cheerful",
            SpeechStyle::Sad => "sad",
            SpeechStyle::Angry => "angry",
            SpeechStyle::Excited => "excited",
            SpeechStyle::Friendly => "friendly",
            SpeechStyle::Empathetic => "empathetic",
            SpeechStyle::Hopeful => "hopeful",
            SpeechStyle::Unfriendly => "unfriendly",
            SpeechStyle::Shouting => "shouting",
            SpeechStyle::Whispering => "whispering",
            SpeechStyle::Assistant => "assistant",
            SpeechStyle::Newscast => "newscast",
            SpeechStyle::Customerservice => "customerservice",
            SpeechStyle::NarrationProfessional => "narration-professional",
            SpeechStyle::NarrationRelaxed => "narration-relaxed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|style| style.as_str() == s)
    }
}

/// Classify the emotional tone of `text` (the reply to be dictated), with
/// `user_query` as context. Call failures and out-of-set answers fall back to
/// `friendly`.
pub async fn detect_style(llm: &LlmClient, text: &str, user_query: &str) -> SpeechStyle {
    let style_names: Vec<&str> = SpeechStyle::ALL.iter().map(|s| s.as_str()).collect();
    let system = format!("Only respond with one word: {}", style_names.join(", "));
    let prompt = format!(
        "Classify the emotional tone of the following sentence into one of the \
         following styles: {}. Respond only with the style name.\n\n\
         User question: {user_query}\n\
         Received Response that need to be dictated: \"{text}\"",
        style_names.join(", ")
    );

    match llm.complete(Some(&system), &prompt).await {
        Ok(answer) => {
            let normalized = answer.trim().to_lowercase();
            SpeechStyle::parse(&normalized).unwrap_or_else(|| {
                warn!(answer = %normalized, "style classifier answered outside the style set");
                SpeechStyle::Friendly
            })
        }
        Err(e) => {
            warn!(error = %e, "style detection failed, falling back to friendly");
            SpeechStyle::Friendly
        }
    }
}

/// Prosody knobs for SSML assembly.
#[derive(Debug, Clone)]
pub struct Prosody {
    pub rate: String,
    pub pitch: String,
    pub volume: String,
}

impl Default for Prosody {
    fn default() -> Self {
        Self { rate: "medium".into(), pitch: "default".into(), volume: "default".into() }
    }
}

/// Build the SSML document for one reply. Non-default styles get the
/// express-as wrapper; `friendly` stays a plain prosody document.
pub fn build_ssml(text: &str, voice: &str, prosody: &Prosody, style: SpeechStyle) -> String {
    let escaped = xml_escape(text);
    let Prosody { rate, pitch, volume } = prosody;

    if style != SpeechStyle::Friendly {
        format!(
            "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" \
             xmlns:mstts=\"http://www.w3.org/2001/mstts\" xml:lang=\"en-US\">\
             <voice name=\"{voice}\">\
             <mstts:express-as style=\"{}\">\
             <prosody rate=\"{rate}\" pitch=\"{pitch}\" volume=\"{volume}\">{escaped}</prosody>\
             </mstts:express-as>\
             </voice>\
             </speak>",
            style.as_str()
        )
    } else {
        format!(
            "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" \
             xml:lang=\"en-US\">\
             <voice name=\"{voice}\">\
             <prosody rate=\"{rate}\" pitch=\"{pitch}\" volume=\"{volume}\">{escaped}</prosody>\
             </voice>\
             </speak>"
        )
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DummyClient, LlmReply};

    fn scripted(answer: &str) -> LlmClient {
        LlmClient::Dummy(DummyClient::scripted(vec![LlmReply {
            text: Some(answer.to_string()),
            tool_calls: Vec::new(),
        }]))
    }

    #[tokio::test]
    async fn detect_style_accepts_known_styles() {
        let style = detect_style(&scripted("Empathetic"), "I lost my data", "oh no").await;
        assert_eq!(style, SpeechStyle::Empathetic);
    }

    #[tokio::test]
    async fn detect_style_falls_back_on_unknown_answer() {
        let style = detect_style(&scripted("melancholic"), "text", "query").await;
        assert_eq!(style, SpeechStyle::Friendly);
    }

    #[tokio::test]
    async fn detect_style_only_returns_allowed_styles() {
        for answer in ["cheerful", "narration-relaxed", "SHOUTING", "nonsense", ""] {
            let style = detect_style(&scripted(answer), "t", "q").await;
            assert!(SpeechStyle::ALL.contains(&style));
        }
    }

    #[test]
    fn styled_ssml_uses_express_as() {
        let ssml = build_ssml("Good news!", "en-US-JennyNeural", &Prosody::default(), SpeechStyle::Cheerful);
        assert!(ssml.contains("mstts:express-as style=\"cheerful\""));
        assert!(ssml.contains("en-US-JennyNeural"));
    }

    #[test]
    fn friendly_ssml_is_plain_prosody() {
        let ssml = build_ssml("Hello", "en-US-JennyNeural", &Prosody::default(), SpeechStyle::Friendly);
        assert!(!ssml.contains("express-as"));
        assert!(ssml.contains("<prosody rate=\"medium\""));
    }

    #[test]
    fn ssml_escapes_markup_in_text() {
        let ssml = build_ssml("a < b & c", "v", &Prosody::default(), SpeechStyle::Friendly);
        assert!(ssml.contains("a &lt; b &amp; c"));
        assert!(!ssml.contains("a < b"));
    }

    #[test]
    fn style_names_round_trip() {
        for style in SpeechStyle::ALL {
            assert_eq!(SpeechStyle::parse(style.as_str()), Some(style));
        }
        assert_eq!(SpeechStyle::ALL.len(), 15);
    }
}
