/// `queue` keyspace: `seq(8)` big-endian, so key order = FIFO order.
pub fn queue_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// `terms` keyspace: `collection_utf8 ++ \x00 ++ shard_utf8`
///
/// The null byte cannot occur in UTF-8 names, so ("ab", "c") and ("a", "bc")
/// never collide.
pub fn term_key(collection: &str, shard: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(collection.len() + 1 + shard.len());
    buf.extend_from_slice(collection.as_bytes());
    buf.push(0x00);
    buf.extend_from_slice(shard.as_bytes());
    buf
}

/// `meta` keyspace label holding the last assigned queue sequence number.
pub const META_QUEUE_SEQ: &[u8] = b"queue_seq";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keys_sort_by_seq() {
        let a = queue_key(1);
        let b = queue_key(2);
        let c = queue_key(1000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn term_keys_do_not_collide() {
        assert_ne!(term_key("ab", "c"), term_key("a", "bc"));
        assert!(term_key("orders", "shard1").starts_with(b"orders\x00"));
    }
}
