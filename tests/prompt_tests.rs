mod common;

use common::*;
use std::io::{BufRead, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use vtcbus::config::{ConfigDocument, ConfigKey, MemoryConfigStore};
use vtcbus::prompt::*;

const WAIT: Duration = Duration::from_secs(2);

fn reader(script: &str) -> LineReader {
    LineReader::spawn(Cursor::new(script.to_string().into_bytes())).unwrap()
}

// Console input that records how many bytes have been taken from it.
struct TrackedInput {
    inner: Cursor<Vec<u8>>,
    consumed: Arc<AtomicUsize>,
}

impl Read for TrackedInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

impl BufRead for TrackedInput {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.consumed.fetch_add(amt, Ordering::SeqCst);
        self.inner.consume(amt);
    }
}

#[test]
fn test_dropped_reader_leaves_later_input_alone() {
    let consumed = Arc::new(AtomicUsize::new(0));
    let input = TrackedInput {
        inner: Cursor::new(b"a\nb\nc\nd\ne\n".to_vec()),
        consumed: consumed.clone(),
    };
    let reader = LineReader::spawn(input).unwrap();

    assert_eq!(reader.read_line(WAIT).as_deref(), Some("a"));
    drop(reader);
    thread::sleep(Duration::from_millis(100));

    // "a" was delivered and at most "b" was pending when the reader went away
    assert!(consumed.load(Ordering::SeqCst) <= 4);
}

#[test]
fn test_confirmed_fields_are_committed() {
    let input = reader("Y\n{\"SITE\":\"south\",\"CLIENTID\":\"dev-9\"}\ny\nN\n");
    let store = MemoryConfigStore::new(test_document());
    let mut handle = store.clone();
    let mut out = Vec::new();

    let outcome = run_boot_prompt(&input, &mut out, &mut handle, WAIT).unwrap();

    assert_eq!(outcome, PromptOutcome::Committed(vec![ConfigKey::Site]));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.document().get(ConfigKey::Site), Some("south"));
    assert_eq!(store.document().get(ConfigKey::ClientId), Some("dev-1"));

    let transcript = String::from_utf8(out).unwrap();
    assert!(transcript.contains("SITE"));
    assert!(transcript.contains("dev-9"));
}

#[test]
fn test_declined_prompt_changes_nothing() {
    let input = reader("n\n");
    let mut store = MemoryConfigStore::new(ConfigDocument::default());
    let mut out = Vec::new();

    let outcome = run_boot_prompt(&input, &mut out, &mut store, WAIT).unwrap();

    assert_eq!(outcome, PromptOutcome::Declined);
    assert_eq!(store.commits(), 0);
}

#[test]
fn test_silent_console_times_out() {
    let input = reader("");
    let mut store = MemoryConfigStore::new(ConfigDocument::default());
    let mut out = Vec::new();

    let outcome = run_boot_prompt(&input, &mut out, &mut store, Duration::from_millis(50)).unwrap();

    assert_eq!(outcome, PromptOutcome::TimedOut);
}

#[test]
fn test_invalid_json_is_reported() {
    let input = reader("Y\nSITE=south\n");
    let mut store = MemoryConfigStore::new(ConfigDocument::default());
    let mut out = Vec::new();

    let outcome = run_boot_prompt(&input, &mut out, &mut store, WAIT).unwrap();

    assert_eq!(outcome, PromptOutcome::InvalidJson);
    assert_eq!(store.commits(), 0);
    assert!(String::from_utf8(out).unwrap().contains("invalid JSON"));
}
