//! 标识符生成
//!
//! - 容器 ID：10 位 62 进制字符串（0-9, a-z, A-Z），用于区分解析链中的容器
//! - 运行 ID：UUID v4，用于串联一次预热运行的全部日志

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 容器 ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数组合
///
/// # Example
///
/// ```
/// use chips_di::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    let random: u64 = rng.gen();
    let mut value = timestamp ^ random;

    let mut result = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        let index = (value % 62) as usize;
        result.push(BASE62_CHARS[index] as char);
        value /= 62;
    }

    result.iter().rev().collect()
}

/// 生成 UUID v4 格式的 ID
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
