use super::*;
use md5::{Digest, Md5};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::IoSlice;

const SEED: u64 = 0x1234_5679;
const MAX_LENGTH: usize = 1024 * 1024;

fn random_corpus(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen()).collect()
}

fn md5_of(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Writes `buf` into `rb` in randomly sized chunks.
fn write_in_random_chunks(rng: &mut StdRng, rb: &mut RingBuffer, buf: &[u8]) {
    let mut remaining = buf;
    while !remaining.is_empty() {
        let n = rng.gen_range(1..=remaining.len());
        rb.write(&remaining[..n]);
        remaining = &remaining[n..];
    }
}

/// Reads exactly `len` bytes out of `rb` in randomly sized chunks, hashing
/// as it goes. Mirrors `test-ring-buf.c`'s `test_read`.
fn read_in_random_chunks(rng: &mut StdRng, rb: &mut RingBuffer, len: usize) -> [u8; 16] {
    let mut hasher = Md5::new();
    let mut temp = vec![0u8; len.max(1)];
    let mut remaining = len;
    while remaining > 0 {
        let want = rng.gen_range(1..=remaining);
        let n = rb.read(&mut temp[..want]);
        assert!(n > 0, "read returned 0 on a non-empty buffer");
        hasher.update(&temp[..n]);
        remaining -= n;
    }
    hasher.finalize().into()
}

#[test]
fn fifo_law_scalar_read_write() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut rb = RingBuffer::new();

    for _ in 0..200 {
        let len = rng.gen_range(1..=MAX_LENGTH / 32);
        let data = random_corpus(&mut rng, len);
        let expected = md5_of(&data);

        write_in_random_chunks(&mut rng, &mut rb, &data);
        let actual = read_in_random_chunks(&mut rng, &mut rb, len);

        assert_eq!(expected, actual, "FIFO law violated at length {len}");
    }
}

#[test]
fn empty_buffer_read_returns_zero() {
    let mut rb = RingBuffer::new();
    let mut buf = [0u8; 16];
    assert_eq!(rb.read(&mut buf), 0);
}

#[test]
fn empty_buffer_head_blocks_returns_zero_bufs() {
    let rb = RingBuffer::new();
    let mut out = [IoSlice::new(&[]); 4];
    let (count, pos) = rb.head_blocks(rb.head(), &mut out);
    assert_eq!(count, 0);
    assert_eq!(pos, rb.head());
}

#[test]
fn fifo_law_vectored_producer_consumer() {
    let mut rng = StdRng::seed_from_u64(SEED.wrapping_add(1));
    let mut rb = RingBuffer::new();

    for _ in 0..100 {
        let len = rng.gen_range(1..=MAX_LENGTH / 64);
        let data = random_corpus(&mut rng, len);
        let expected = md5_of(&data);

        // Producer side: tail_block / tail_block_commit.
        let mut remaining = &data[..];
        while !remaining.is_empty() {
            let want = rng.gen_range(1..=remaining.len());
            let dst = rb.tail_block(want);
            let n = dst.len();
            dst.copy_from_slice(&remaining[..n]);
            rb.tail_block_commit(n);
            remaining = &remaining[n..];
        }

        // Consumer side: head_blocks / head_blocks_commit.
        let mut hasher = Md5::new();
        let mut remaining = len;
        while remaining > 0 {
            let mut out = [
                IoSlice::new(&[]),
                IoSlice::new(&[]),
                IoSlice::new(&[]),
            ];
            let (count, pos) = rb.head_blocks(rb.head(), &mut out);
            assert!(count > 0, "head_blocks returned 0 on a non-empty buffer");
            let mut copied = 0;
            for slice in &out[..count] {
                hasher.update(&slice[..]);
                copied += slice.len();
            }
            rb.head_blocks_commit(pos);
            remaining -= copied;
        }

        let actual: [u8; 16] = hasher.finalize().into();
        assert_eq!(expected, actual, "vectored FIFO law violated at length {len}");
    }
}

#[test]
fn head_blocks_is_empty_after_commit_until_new_production() {
    let mut rb = RingBuffer::new();
    rb.write(b"hello world");

    let mut out = [IoSlice::new(&[]); 2];
    let (count, pos) = rb.head_blocks(rb.head(), &mut out);
    assert!(count > 0);
    rb.head_blocks_commit(pos);

    let (count, pos2) = rb.head_blocks(pos, &mut out);
    assert_eq!(count, 0);
    assert_eq!(pos2, pos);

    rb.write(b"!");
    let (count, _) = rb.head_blocks(pos, &mut out);
    assert_eq!(count, 1);
}

#[test]
fn memory_is_bounded_after_full_drain() {
    let mut rb = RingBuffer::new();
    let chunk = vec![0u8; BLOCK_SIZE / 2];
    let mut scratch = vec![0u8; BLOCK_SIZE / 2];

    for _ in 0..64 {
        rb.write(&chunk);
        let n = rb.read(&mut scratch);
        assert_eq!(n, chunk.len());
    }

    assert!(
        rb.block_count() <= 2,
        "expected bounded block count, got {}",
        rb.block_count()
    );
}

#[test]
fn tail_block_commit_past_reservation_panics() {
    let mut rb = RingBuffer::new();
    let n = rb.tail_block(16).len();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        rb.tail_block_commit(n + 1);
    }));
    assert!(result.is_err());
}

proptest::proptest! {
    #[test]
    fn write_then_read_preserves_bytes(chunks in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..512), 0..32)) {
        let mut rb = RingBuffer::new();
        let mut expected = Vec::new();
        for chunk in &chunks {
            rb.write(chunk);
            expected.extend_from_slice(chunk);
        }

        let mut actual = vec![0u8; expected.len()];
        let mut copied = 0;
        while copied < actual.len() {
            let n = rb.read(&mut actual[copied..]);
            if n == 0 {
                break;
            }
            copied += n;
        }

        proptest::prop_assert_eq!(copied, expected.len());
        proptest::prop_assert_eq!(actual, expected);
    }
}
