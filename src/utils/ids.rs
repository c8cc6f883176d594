use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ID_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Random document id. Falls back to a clock+sequence id when the OS
/// entropy source is unavailable.
pub fn new_document_id() -> String {
    random_hex::<10>().unwrap_or_else(|| {
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("doc_{}_{seq}", now_millis())
    })
}

/// Agent conversation id sent to the webhook with every message of a challenge.
pub fn new_session_id() -> String {
    random_hex::<16>().unwrap_or_else(|| {
        let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("session_{}_{seq}", now_millis())
    })
}

pub(crate) fn random_u64() -> Option<u64> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).ok()?;
    Some(u64::from_le_bytes(bytes))
}

fn random_hex<const N: usize>() -> Option<String> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).ok()?;
    Some(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}
