//! Speculative streaming JSON parser (component A).
//!
//! Grounded on the teacher's line-oriented parsers
//! (`codex/src/jsonl.rs::JsonlThreadEventParser`,
//! `claude_code/src/stream_json.rs::ClaudeStreamJsonParser`), generalized
//! from "one JSON value per line" to the full tolerance the spec
//! requires: a value split across chunks, several values concatenated
//! on one line, and any interleaving of the two. `serde_json`'s
//! `StreamDeserializer` already walks a byte buffer and reports how
//! many bytes a value consumed, which makes it the right primitive for
//! this rather than manual newline splitting — a manual split can cut
//! a pretty-printed value in half, `StreamDeserializer` cannot.

use std::sync::Mutex;

use serde_json::Value;

use crate::error::AgentError;
use crate::message::Envelope;

/// Hard cap on the parser's internal buffer (§3 "Parser Buffer").
pub const MAX_BUFFER_BYTES: usize = 1 << 20;

struct ParserState {
    buffer: Vec<u8>,
}

/// Accumulates bytes from an unreliable line boundary and yields fully
/// typed [`Envelope`] values. Thread-safe via an internal mutex so it
/// can be invoked concurrently (§4.A); concurrent calls simply
/// serialize on the buffer.
pub struct EnvelopeParser {
    state: Mutex<ParserState>,
}

impl Default for EnvelopeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeParser {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ParserState { buffer: Vec::new() }),
        }
    }

    /// Feed a chunk of bytes (need not be line-aligned). Returns the
    /// envelopes that became parseable as a result, each independently
    /// `Ok` or a decode failure for that one value — a single malformed
    /// object does not poison the rest of the buffer.
    ///
    /// A buffer-cap overflow is surfaced as one more `Err(..)` entry
    /// appended to the same returned `Vec` rather than failing the
    /// whole call — a chunk boundary that happens to land "N complete
    /// envelopes + unparseable trailing garbage" in one `feed()` call
    /// must not lose the N envelopes already extracted (§8 framing
    /// invariance: the same bytes delivered as two separate `feed()`
    /// calls would not lose them either).
    pub fn feed(&self, chunk: &[u8]) -> Result<Vec<Result<Envelope, AgentError>>, AgentError> {
        let mut state = self.state.lock().expect("parser mutex poisoned");
        state.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            if state.buffer.iter().all(u8::is_ascii_whitespace) {
                state.buffer.clear();
                break;
            }

            let mut stream =
                serde_json::Deserializer::from_slice(&state.buffer).into_iter::<Value>();
            match stream.next() {
                None => break,
                Some(Ok(value)) => {
                    let consumed = stream.byte_offset();
                    state.buffer.drain(0..consumed);
                    out.push(decode_envelope(value));
                }
                Some(Err(err)) => {
                    // Incomplete or malformed — per §4.A this is "not
                    // yet complete", not an error. We can't tell the
                    // two apart without re-parsing with more bytes, so
                    // both wait here; the buffer-cap check below is
                    // the backstop for input that will never complete.
                    let _ = err;
                    break;
                }
            }
        }

        if state.buffer.len() > MAX_BUFFER_BYTES {
            let attempted_size = state.buffer.len();
            state.buffer.clear();
            out.push(Err(AgentError::BufferOverflow { attempted_size }));
        }

        Ok(out)
    }

    /// Number of bytes currently retained, awaiting completion.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().expect("parser mutex poisoned").buffer.len()
    }
}

fn decode_envelope(value: Value) -> Result<Envelope, AgentError> {
    serde_json::from_value::<Envelope>(value.clone()).map_err(|err| AgentError::Parse {
        reason: err.to_string(),
        offending: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_envelopes(results: Vec<Result<Envelope, AgentError>>) -> Vec<Envelope> {
        results.into_iter().map(|r| r.expect("expected ok envelope")).collect()
    }

    #[test]
    fn split_json_across_chunks() {
        let parser = EnvelopeParser::new();
        let first = parser
            .feed(br#"{"type":"user","message":"#)
            .unwrap();
        assert!(first.is_empty());

        let second = parser
            .feed(br#" {"content":[{"type":"text","text":"Hi"}]}}"#)
            .unwrap();
        let envelopes = ok_envelopes(second);
        assert_eq!(envelopes.len(), 1);
        match &envelopes[0] {
            Envelope::User(msg) => {
                let blocks = msg.message.content.as_blocks();
                assert_eq!(blocks.len(), 1);
            }
            other => panic!("expected user envelope, got {other:?}"),
        }
    }

    #[test]
    fn two_envelopes_on_one_line() {
        let parser = EnvelopeParser::new();
        let results = parser
            .feed(b"{\"type\":\"system\",\"subtype\":\"a\"}\n{\"type\":\"system\",\"subtype\":\"b\"}")
            .unwrap();
        let envelopes = ok_envelopes(results);
        assert_eq!(envelopes.len(), 2);
        let subtypes: Vec<&str> = envelopes
            .iter()
            .map(|e| match e {
                Envelope::System(s) => s.subtype.as_str(),
                other => panic!("expected system envelope, got {other:?}"),
            })
            .collect();
        assert_eq!(subtypes, vec!["a", "b"]);
    }

    #[test]
    fn empty_and_whitespace_input_yields_nothing() {
        let parser = EnvelopeParser::new();
        assert!(parser.feed(b"").unwrap().is_empty());
        assert!(parser.feed(b"   \n  \n").unwrap().is_empty());
    }

    #[test]
    fn buffer_overflow_resets_and_recovers() {
        let parser = EnvelopeParser::new();
        // An object that never closes, larger than the cap.
        let garbage = vec![b'a'; MAX_BUFFER_BYTES + 1];
        let mut payload = br#"{"type":"system","subtype":""#.to_vec();
        payload.extend_from_slice(&garbage);

        let results = parser.feed(&payload).unwrap();
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(AgentError::BufferOverflow { attempted_size }) => {
                assert!(*attempted_size > MAX_BUFFER_BYTES);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(parser.buffered_len(), 0);

        // Parser recovers: a subsequent well-formed object parses fine.
        let results = parser
            .feed(br#"{"type":"system","subtype":"recovered"}"#)
            .unwrap();
        let envelopes = ok_envelopes(results);
        assert_eq!(envelopes.len(), 1);
    }

    #[test]
    fn overflow_preserves_already_parsed_envelopes_in_the_same_call() {
        let parser = EnvelopeParser::new();
        let mut payload = br#"{"type":"system","subtype":"a"}"#.to_vec();
        payload.extend_from_slice(br#"{"type":"system","subtype":""#);
        payload.extend_from_slice(&vec![b'a'; MAX_BUFFER_BYTES + 1]);

        let results = parser.feed(&payload).unwrap();
        assert_eq!(results.len(), 2);
        match &results[0] {
            Ok(Envelope::System(s)) => assert_eq!(s.subtype, "a"),
            other => panic!("expected the already-complete envelope to survive, got {other:?}"),
        }
        assert!(matches!(results[1], Err(AgentError::BufferOverflow { .. })));
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn malformed_object_does_not_poison_later_objects() {
        let parser = EnvelopeParser::new();
        let results = parser
            .feed(b"{\"type\":\"user\"}\n{\"type\":\"system\",\"subtype\":\"ok\"}")
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let parser = EnvelopeParser::new();
        let results = parser.feed(br#"{"type":"bogus"}"#).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
