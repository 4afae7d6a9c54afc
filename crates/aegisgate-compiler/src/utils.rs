//! 编译器工具函数
//!
//! 哈希与名称截断等在命名和协调中复用的辅助函数。

use sha2::{Digest, Sha256};

/// 计算字符串的 SHA-256 哈希
pub fn sha256_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();

    format!("{:x}", result)
}

/// 截取哈希前缀
pub fn short_hash(input: &str, length: usize) -> String {
    let mut hash = sha256_hash(input);
    hash.truncate(length.min(hash.len()));
    hash
}

/// 在字符边界上截断，结果不超过 `max_bytes` 字节
pub fn truncate_on_char_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let hash = sha256_hash("hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("hello", 8), "2cf24dba");
        assert_eq!(short_hash("hello", 100).len(), 64);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_on_char_boundary("abcdef", 3), "abc");
        assert_eq!(truncate_on_char_boundary("ab", 3), "ab");
        // "策" 占 3 个字节
        assert_eq!(truncate_on_char_boundary("a策略", 2), "a");
    }
}
