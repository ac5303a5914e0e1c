//! PoW engine (C2): mines a `nonce` tag so an event's id has at least `bits`
//! leading zero bits, and verifies the same.
//!
//! Mining is CPU-bound, so workers run on dedicated OS threads rather than
//! tokio tasks — the async executor driving socket I/O must never be
//! starved by nonce search.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nostrmq_protocol::{Event, EventTemplate};

/// How many nonces a worker tries before re-checking the cancellation flag
/// and, opportunistically, refreshing `created_at` so the template doesn't
/// go stale across a long mining run.
const CHECK_INTERVAL: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum PowError {
    #[error("mining deadline of {0:?} exceeded")]
    Timeout(Duration),
}

/// Mine `template` so that `event_hash(template')` has at least `bits`
/// leading zero bits, appending exactly one `nonce` tag. `bits = 0` returns
/// `template` unchanged, with no nonce tag and no mining work performed.
pub async fn mine_event_pow(
    template: EventTemplate,
    bits: u32,
    workers: usize,
    deadline: Duration,
) -> Result<EventTemplate, PowError> {
    if bits == 0 {
        return Ok(template);
    }

    let workers = workers.max(1);
    let found = Arc::new(AtomicBool::new(false));
    let (tx, rx) = std::sync::mpsc::sync_channel::<EventTemplate>(workers);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers as u64 {
        let template = template.clone();
        let found = Arc::clone(&found);
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            mine_worker(template, bits, worker_id, workers as u64, &found, tx);
        }));
    }
    drop(tx);

    let wait_result = tokio::task::spawn_blocking(move || rx.recv_timeout(deadline))
        .await
        .expect("mining wait thread panicked");

    found.store(true, Ordering::SeqCst);
    // Workers exit within CHECK_INTERVAL iterations of the flag flipping;
    // join them on a detached thread so mine_event_pow doesn't block on it.
    std::thread::spawn(move || {
        for handle in handles {
            let _ = handle.join();
        }
    });

    wait_result.map_err(|_| PowError::Timeout(deadline))
}

fn mine_worker(
    mut template: EventTemplate,
    bits: u32,
    start: u64,
    step: u64,
    found: &AtomicBool,
    tx: SyncSender<EventTemplate>,
) {
    let mut nonce = start;
    let mut since_check: u64 = 0;
    loop {
        if found.load(Ordering::Relaxed) {
            return;
        }

        set_nonce_tag(&mut template, nonce, bits);
        let id = nostrmq_crypto::event_hash(&template);
        if count_leading_zero_bits(&id) >= bits {
            let _ = tx.send(template);
            return;
        }

        nonce = nonce.wrapping_add(step);
        since_check += 1;
        if since_check >= CHECK_INTERVAL {
            since_check = 0;
            if found.load(Ordering::Relaxed) {
                return;
            }
            if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
                template.created_at = now.as_secs() as i64;
            }
        }
    }
}

fn set_nonce_tag(template: &mut EventTemplate, nonce: u64, bits: u32) {
    template.tags.retain(|t| t.first().map(String::as_str) != Some("nonce"));
    template.tags.push(vec![
        "nonce".to_owned(),
        nonce.to_string(),
        bits.to_string(),
    ]);
}

/// Count leading zero bits in a hex-encoded hash: four per leading zero
/// nibble, plus the leading-zero bits of the first non-zero nibble.
pub fn count_leading_zero_bits(hex_str: &str) -> u32 {
    let mut bits = 0;
    for ch in hex_str.chars() {
        let Some(value) = ch.to_digit(16) else {
            break;
        };
        if value == 0 {
            bits += 4;
            continue;
        }
        bits += (value as u8).leading_zeros() - 4;
        break;
    }
    bits
}

/// True iff `event` carries a `nonce` tag declaring at least `bits`, and its
/// id honestly has at least `bits` leading zero bits. `bits <= 0` is always
/// satisfied.
pub fn has_valid_pow(event: &Event, bits: u32) -> bool {
    if bits == 0 {
        return true;
    }
    let Some(nonce_tag) = event
        .tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("nonce"))
    else {
        return false;
    };
    let Some(declared) = nonce_tag.get(2).and_then(|bits_str| bits_str.parse::<u32>().ok()) else {
        return false;
    };
    declared >= bits && validate_pow_difficulty(&event.id, bits)
}

/// True iff `event_id_hex` honestly has at least `bits` leading zero bits,
/// independent of any declared-bits tag.
pub fn validate_pow_difficulty(event_id_hex: &str, bits: u32) -> bool {
    count_leading_zero_bits(event_id_hex) >= bits
}
