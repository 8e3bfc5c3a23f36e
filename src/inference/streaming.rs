//! Token streaming
//!
//! Generated text travels from the generation worker to the caller over a
//! channel of [`StreamToken`]s. [`TokenStream`] is the caller's side.

use crate::inference::engine::EngineError;
use encoding_rs::{CoderResult, Decoder, UTF_8};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Message sent by the generation worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamToken {
    /// Next piece of generated text
    Token(String),
    /// Generation finished normally
    Done,
    /// Generation failed
    Error(String),
}

/// Lazy sequence of generated fragments for one instruction
///
/// Iterating drives the worker; dropping the stream early asks the worker
/// to stop generating for this instruction.
pub struct TokenStream {
    rx: Receiver<StreamToken>,
    stop: Arc<AtomicBool>,
    finished: bool,
}

impl TokenStream {
    pub fn new(rx: Receiver<StreamToken>, stop: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            stop,
            finished: false,
        }
    }

    /// Ask the worker to stop after the fragment in flight
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Iterator for TokenStream {
    type Item = Result<String, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(StreamToken::Token(text)) => Some(Ok(text)),
            Ok(StreamToken::Done) => {
                self.finished = true;
                None
            }
            Ok(StreamToken::Error(e)) => {
                self.finished = true;
                Some(Err(EngineError::Generation(e)))
            }
            Err(_) => {
                self.finished = true;
                Some(Err(EngineError::WorkerGone))
            }
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

/// Reassembles UTF-8 text from token bytes
///
/// A token may end in the middle of a multi-byte character; the tail is
/// held back until the next token completes it.
pub struct Utf8Assembler {
    decoder: Decoder,
}

impl Default for Utf8Assembler {
    fn default() -> Self {
        Self {
            decoder: UTF_8.new_decoder(),
        }
    }
}

impl Utf8Assembler {
    /// Decode `bytes`, returning whatever text is complete so far
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.decode(bytes, false)
    }

    /// Flush held-back bytes at the end of an answer
    ///
    /// An incomplete trailing character comes out as U+FFFD.
    pub fn finish(&mut self) -> String {
        let tail = self.decode(&[], true);
        self.decoder = UTF_8.new_decoder();
        tail
    }

    fn decode(&mut self, mut bytes: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 4);
            out.reserve(needed);
            let (result, read, _) = self.decoder.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_stream_yields_tokens_in_order() {
        let (tx, rx) = mpsc::channel();
        for piece in ["Hello", ", ", "world"] {
            tx.send(StreamToken::Token(piece.to_string())).unwrap();
        }
        tx.send(StreamToken::Done).unwrap();

        let stream = TokenStream::new(rx, Arc::new(AtomicBool::new(false)));
        let text: String = stream.map(|t| t.unwrap()).collect();
        assert_eq!(text, "Hello, world");
    }

    #[test]
    fn test_stream_error_ends_stream() {
        let (tx, rx) = mpsc::channel();
        tx.send(StreamToken::Token("a".to_string())).unwrap();
        tx.send(StreamToken::Error("boom".to_string())).unwrap();
        tx.send(StreamToken::Token("never".to_string())).unwrap();

        let mut stream = TokenStream::new(rx, Arc::new(AtomicBool::new(false)));
        assert_eq!(stream.next().unwrap().unwrap(), "a");
        assert!(matches!(stream.next(), Some(Err(EngineError::Generation(e))) if e == "boom"));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_disconnected_worker_is_an_error() {
        let (tx, rx) = mpsc::channel::<StreamToken>();
        drop(tx);
        let mut stream = TokenStream::new(rx, Arc::new(AtomicBool::new(false)));
        assert!(matches!(stream.next(), Some(Err(EngineError::WorkerGone))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_dropping_unfinished_stream_sets_stop() {
        let (tx, rx) = mpsc::channel();
        tx.send(StreamToken::Token("a".to_string())).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let mut stream = TokenStream::new(rx, stop.clone());
        stream.next();
        drop(stream);
        assert!(stop.load(Ordering::Relaxed));
    }

    #[test]
    fn test_finished_stream_leaves_stop_clear() {
        let (tx, rx) = mpsc::channel();
        tx.send(StreamToken::Done).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let stream = TokenStream::new(rx, stop.clone());
        assert_eq!(stream.count(), 0);
        assert!(!stop.load(Ordering::Relaxed));
    }

    #[test]
    fn test_utf8_split_across_tokens() {
        let mut assembler = Utf8Assembler::default();
        let bytes = "é".as_bytes();
        assert_eq!(assembler.push(&bytes[..1]), "");
        assert_eq!(assembler.push(&bytes[1..]), "é");
        assert_eq!(assembler.push(b"ok"), "ok");
        assert_eq!(assembler.finish(), "");
    }

    #[test]
    fn test_incomplete_tail_is_flushed_as_replacement() {
        let mut assembler = Utf8Assembler::default();
        let bytes = "日".as_bytes();
        assert_eq!(assembler.push(&bytes[..2]), "");
        assert_eq!(assembler.finish(), "\u{FFFD}");

        // Usable for the next answer
        assert_eq!(assembler.push("ok".as_bytes()), "ok");
    }
}
