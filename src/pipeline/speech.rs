//! Audio stage: narrate summaries and syntheses as MP3.
//!
//! Google's translate TTS endpoint (the one gTTS uses) rejects requests over
//! 100 characters, so text is cut into chunks at sentence punctuation, then
//! at whitespace, then mid-word as a last resort. Each chunk comes back as a
//! self-contained MP3 stream; MP3 frames can be concatenated byte-for-byte,
//! so the chunks are simply appended.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use crate::pipeline::clean::truncate_chars;
use crate::pipeline::input::build_http_client;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Longest text accepted by one TTS request.
pub const TTS_CHUNK_CHARS: usize = 100;

/// Bitrate of the MP3 the TTS endpoint returns, in bits per second.
const TTS_BITRATE_BPS: f64 = 32_000.0;

/// Turns text into MP3 bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, DigestError>;
}

/// [`SpeechSynthesizer`] calling the Google Translate TTS endpoint.
pub struct GoogleTts {
    client: reqwest::Client,
    endpoint: String,
    lang: String,
}

impl GoogleTts {
    pub fn new(config: &PipelineConfig) -> Result<Self, DigestError> {
        Ok(Self {
            client: build_http_client(&config.user_agent, config.api_timeout_secs)?,
            endpoint: config.endpoints.tts.clone(),
            lang: config.tts_lang.clone(),
        })
    }

    async fn fetch_chunk(&self, chunk: &str, idx: usize, total: usize) -> Result<Vec<u8>, DigestError> {
        let failed = |reason: String| DigestError::SpeechFailed { reason };
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8".to_string()),
                ("q", chunk.to_string()),
                ("tl", self.lang.clone()),
                ("client", "tw-ob".to_string()),
                ("total", total.to_string()),
                ("idx", idx.to_string()),
                ("textlen", chunk.chars().count().to_string()),
            ])
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!(
                "HTTP {} for chunk {}/{}",
                response.status(),
                idx + 1,
                total
            )));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, DigestError> {
        let chunks = split_for_tts(text, TTS_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(DigestError::SpeechFailed {
                reason: "nothing to narrate".into(),
            });
        }

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            audio.extend(self.fetch_chunk(chunk, idx, chunks.len()).await?);
        }
        debug!("Synthesised {} chunks into {} bytes", chunks.len(), audio.len());
        Ok(audio)
    }
}

/// Estimated playing time of an MP3 of `bytes` bytes.
pub fn estimate_duration_secs(bytes: u64) -> f64 {
    bytes as f64 * 8.0 / TTS_BITRATE_BPS
}

static RE_MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").unwrap());
static RE_MD_QUOTE_OR_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:>|[-*+]\s|\d+\.\s)\s*").unwrap());
static RE_MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_`]{1,3}").unwrap());

/// Spoken forms of abbreviations common in papers.
const ABBREVIATIONS: [(&str, &str); 7] = [
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("et al.", "and colleagues"),
    ("etc.", "et cetera"),
    ("Fig.", "Figure"),
    ("Eq.", "Equation"),
    ("vs.", "versus"),
];

/// Make text suitable for narration and cap it at `max_chars` characters.
pub fn prepare_for_speech(text: &str, max_chars: usize) -> String {
    let s = RE_MD_LINK.replace_all(text, "$1");
    let s = RE_MD_HEADING.replace_all(&s, "");
    let s = RE_MD_QUOTE_OR_BULLET.replace_all(&s, "");
    let mut s = RE_MD_EMPHASIS.replace_all(&s, "").into_owned();
    for (abbr, spoken) in ABBREVIATIONS {
        s = s.replace(abbr, spoken);
    }
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars).trim_end().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Sentences (ending in `.`, `!`, `?`, `;` or `:`) are packed together while
/// they fit; longer sentences are split at whitespace, and words longer than
/// `max_chars` are split mid-word.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();

    for sentence in sentences(text) {
        if char_len(sentence) <= max_chars {
            pieces.push(sentence.to_string());
            continue;
        }
        for word in sentence.split_whitespace() {
            if char_len(word) <= max_chars {
                pieces.push(word.to_string());
            } else {
                let chars: Vec<char> = word.chars().collect();
                pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            }
        }
    }

    // Pack pieces greedily, joining with a single space.
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
        } else if char_len(&current) + 1 + char_len(&piece) <= max_chars {
            current.push(' ');
            current.push_str(&piece);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = piece;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Trimmed, non-empty sentences, each keeping its closing punctuation.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?' | ';' | ':')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            out.push(text[start..end].trim());
            start = end;
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}
