//! Md5-based sharding.

/// Compute md5 shard for the set of inputs.
///
/// This function accepts an array of inputs to allow the caller to avoid allocating memory when
/// input is compound from multiple segments.
pub(crate) fn get_md5_shard(input: &[impl AsRef<[u8]>], total_shards: u32) -> u32 {
    let hash = {
        let mut hasher = md5::Context::new();
        for i in input {
            hasher.consume(i);
        }
        hasher.compute()
    };
    let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    value % total_shards
}

#[cfg(test)]
mod tests {
    use super::get_md5_shard;

    #[test]
    fn test_get_md5_shard() {
        assert_eq!(get_md5_shard(&["test-input"], 10_000), 5619);
        assert_eq!(get_md5_shard(&["alice"], 10_000), 3170);
        assert_eq!(get_md5_shard(&["bob"], 10_000), 7420);
    }

    #[test]
    fn segments_are_concatenated() {
        assert_eq!(
            get_md5_shard(&["salt", "-", "subject"], 10_000),
            get_md5_shard(&["salt-subject"], 10_000)
        );
    }
}
