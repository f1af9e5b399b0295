//! 帧编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │       Payload (N bytes)      │   SENTINEL (12 bytes)    │
//! │   UTF-8 文本或原始字节       │   "\x1e<finished>\x1e"   │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! 整帧按 `chunk_size` 切分后逐块写出，块边界没有任何语义，
//! 可能把负载或结束标记切到任意位置。接收端只在拼接之后查找结束标记。

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::SENTINEL;

/// 待发送的负载
///
/// `Text` 以 UTF-8 编码发送，`Raw` 原样发送。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Text(&'a str),
    Raw(&'a [u8]),
}

impl<'a> Payload<'a> {
    /// 线上字节
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Raw(bytes) => bytes,
        }
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(text: &'a str) -> Self {
        Payload::Text(text)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(text: &'a String) -> Self {
        Payload::Text(text)
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Payload::Raw(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

/// 负载后追加结束标记
pub fn encode_frame(payload: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(payload.len() + SENTINEL.len());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(SENTINEL);
    frame
}

/// 编码一帧并按 `chunk_size` 切块
///
/// 除最后一块外每块恰好 `chunk_size` 字节，最后一块 1..=chunk_size 字节。
pub fn encode_chunks(payload: &[u8], chunk_size: usize) -> Result<Vec<Bytes>> {
    if chunk_size == 0 {
        return Err(ProtocolError::InvalidChunkSize(chunk_size));
    }

    let frame = encode_frame(payload).freeze();
    let chunks = (0..frame.len())
        .step_by(chunk_size)
        .map(|start| frame.slice(start..frame.len().min(start + chunk_size)))
        .collect();
    Ok(chunks)
}

/// 无状态的单步解码
///
/// 把 `new_bytes` 追加到 `existing` 后取出至多一个完整负载。
/// 结束标记之后的字节留在返回的缓冲区中；只有结束标记的空帧不产生负载。
pub fn feed(existing: BytesMut, new_bytes: &[u8]) -> (Option<Bytes>, BytesMut) {
    let mut decoder = FrameDecoder::from_buffer(existing, usize::MAX);
    decoder.extend(new_bytes);
    let frame = decoder.take_frame();
    (frame, decoder.into_buffer())
}

/// 按单字节编码（Latin-1）把负载转为文本，任何字节都不会解码失败
pub fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// 空串或仅含空白
///
/// 信息分隔符 `\x1c`..`\x1f` 也算空白，与哨兵使用的 `\x1e` 一致。
pub fn is_blank(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_whitespace() || ('\x1c'..='\x1f').contains(&c))
}

/// 增量帧解码器
///
/// 持有一个连接的累积缓冲区。`next_frame` 取走完整帧后缓冲区只剩未完成的部分。
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// 此位置之前不可能出现结束标记的起点
    scanned: usize,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// 创建新的解码器
    pub fn new(max_frame_size: usize) -> Self {
        Self::from_buffer(BytesMut::new(), max_frame_size)
    }

    fn from_buffer(buffer: BytesMut, max_frame_size: usize) -> Self {
        Self {
            buffer,
            scanned: 0,
            max_frame_size,
        }
    }

    /// 追加新读到的字节
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 取出下一个非空完整帧
    ///
    /// 没有完整帧时返回 `Ok(None)`；未完成部分超过上限时返回 `FrameTooLarge`。
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(frame) = self.take_frame() {
            return Ok(Some(frame));
        }
        if self.buffer.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            });
        }
        Ok(None)
    }

    /// 当前缓冲的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn into_buffer(self) -> BytesMut {
        self.buffer
    }

    fn take_frame(&mut self) -> Option<Bytes> {
        loop {
            let Some(end) = self.find_sentinel() else {
                // 结束标记可能跨读取边界，保留最后 len-1 个字节下次重新扫描
                self.scanned = self.buffer.len().saturating_sub(SENTINEL.len() - 1);
                return None;
            };

            let frame = self.buffer.split_to(end).freeze();
            self.buffer.advance(SENTINEL.len());
            self.scanned = 0;

            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    fn find_sentinel(&self) -> Option<usize> {
        let window = self.buffer.get(self.scanned..)?;
        window
            .windows(SENTINEL.len())
            .position(|w| w == SENTINEL)
            .map(|pos| pos + self.scanned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(chunks: &[Bytes]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    #[test]
    fn test_encode_chunks_sizes() {
        let chunks = encode_chunks(b"hello", 4).unwrap();
        let total = 5 + SENTINEL.len();
        assert_eq!(chunks.len(), total.div_ceil(4));
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.len(), 4);
        }
        let last = chunks.last().unwrap().len();
        assert!((1..=4).contains(&last));
        assert_eq!(concat(&chunks), [&b"hello"[..], SENTINEL].concat());
    }

    #[test]
    fn test_encode_chunks_empty_payload() {
        let chunks = encode_chunks(b"", 64).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..], SENTINEL);
    }

    #[test]
    fn test_encode_chunks_zero_chunk_size() {
        assert!(matches!(
            encode_chunks(b"hello", 0),
            Err(ProtocolError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_feed_chunk_by_chunk() {
        let payloads: [&[u8]; 4] = [
            b"hello",
            b"a",
            "多字节 utf-8 内容".as_bytes(),
            &[0x00, 0xff, 0x80, 0x1e, 0x7f],
        ];

        for payload in payloads {
            for chunk_size in [1, 2, 3, 4, 7, 11, 12, 13, 64] {
                let chunks = encode_chunks(payload, chunk_size).unwrap();
                let mut buffer = BytesMut::new();
                let mut completed = Vec::new();

                for (i, chunk) in chunks.iter().enumerate() {
                    let (frame, rest) = feed(buffer, chunk);
                    buffer = rest;
                    if i + 1 < chunks.len() {
                        assert!(frame.is_none(), "premature frame at chunk {i}");
                    }
                    completed.extend(frame);
                }

                assert_eq!(completed.len(), 1, "chunk_size={chunk_size}");
                assert_eq!(&completed[0][..], payload);
                assert!(buffer.is_empty());
            }
        }
    }

    #[test]
    fn test_feed_split_sentinel() {
        let frame = encode_frame(b"split me");
        let whole = feed(BytesMut::new(), &frame).0.unwrap();

        // 边界落在结束标记内部的每一个位置
        for cut in frame.len() - SENTINEL.len() + 1..frame.len() {
            let (first, buffer) = feed(BytesMut::new(), &frame[..cut]);
            assert!(first.is_none());
            let (second, buffer) = feed(buffer, &frame[cut..]);
            assert_eq!(second.as_ref(), Some(&whole));
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_feed_sentinel_only_is_no_message() {
        let (frame, buffer) = feed(BytesMut::new(), SENTINEL);
        assert!(frame.is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_feed_keeps_remainder() {
        let mut wire = encode_frame(b"first");
        wire.extend_from_slice(b"sec");

        let (frame, buffer) = feed(BytesMut::new(), &wire);
        assert_eq!(frame.as_deref(), Some(&b"first"[..]));
        assert_eq!(&buffer[..], b"sec");

        let (frame, buffer) = feed(buffer, &encode_frame(b"ond"));
        assert_eq!(frame.as_deref(), Some(&b"second"[..]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decoder_multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new(1024);
        let mut wire = encode_frame(b"one");
        wire.extend_from_slice(&encode_frame(b""));
        wire.extend_from_slice(&encode_frame(b"two"));
        decoder.extend(&wire);

        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(&b"two"[..]));
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_frame_too_large() {
        let mut decoder = FrameDecoder::new(8);
        decoder.extend(b"0123456789");
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooLarge { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_decoder_limit_ignores_completed_frames() {
        let mut decoder = FrameDecoder::new(8);
        decoder.extend(&encode_frame(b"0123456789"));
        assert_eq!(
            decoder.next_frame().unwrap().as_deref(),
            Some(&b"0123456789"[..])
        );
    }

    #[test]
    fn test_decode_text_latin1() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = decode_text(&bytes);
        assert_eq!(text.chars().count(), 256);
        assert_eq!(text.chars().last(), Some('\u{ff}'));
        assert_eq!(decode_text(b"hello"), "hello");
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \t\r\n"));
        assert!(!is_blank(" x "));
        assert!(is_blank("\x1f"));
        assert!(is_blank(" \x1c\x1d\x1e\n"));
        assert!(!is_blank("\x1bx"));
    }

    #[test]
    fn test_payload_bytes() {
        assert_eq!(Payload::from("hé").as_bytes(), "hé".as_bytes());
        let raw = vec![0xffu8, 0x00];
        assert_eq!(Payload::from(&raw).as_bytes(), &[0xff, 0x00]);
    }
}
