//! 字节流分帧与 Cookie 重同步。
//!
//! # 教案定位（Why）
//! - 一次读取可能包含多帧，也可能夹带 Cookie 帧；路由核心需要逐帧交给编解码器；
//! - 长度字段损坏时，是否还能恢复后续帧取决于对端是否发送 Cookie，因此重同步是可选行为。
//!
//! # 执行逻辑（How）
//! 1. 当前位置若是 Cookie 帧，产出 [`Frame::Cookie`] 并跳过 16 字节；
//! 2. 读取头部长度字段，声明长度落在剩余字节内则产出 [`Frame::Message`]；
//! 3. 否则视为损坏：开启重同步时跳到下一个 Cookie，未找到或未开启时吞掉剩余全部字节，
//!    产出 [`Frame::Corrupt`] 后结束。

use crate::cookie::{CookieKind, MAGIC_COOKIE_LEN, find_magic_cookie, magic_cookie_kind};
use crate::header::{Header, LENGTH_BASE};

/// 分帧结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Frame<'a> {
    /// 一帧长度自洽的报文字节，尚未做语义校验。
    Message(&'a [u8]),
    /// 一个 Cookie 帧。
    Cookie(CookieKind),
    /// 无法按长度字段切分的片段。
    Corrupt {
        /// 片段在缓冲中的起始偏移。
        offset: usize,
        /// 被跳过的字节。
        bytes: &'a [u8],
    },
}

/// 按头部长度字段切分缓冲的迭代器。
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    offset: usize,
    resync: bool,
}

impl<'a> FrameReader<'a> {
    /// 构造分帧器；`resync` 为真时损坏后尝试在下一个 Cookie 处恢复。
    pub fn new(buf: &'a [u8], resync: bool) -> Self {
        Self {
            buf,
            offset: 0,
            resync,
        }
    }

    /// 已消费的字节数。
    pub fn position(&self) -> usize {
        self.offset
    }

    fn frame_at(&self, rest: &[u8]) -> Option<usize> {
        let header = Header::peek(rest)?;
        if header.length < LENGTH_BASE {
            return None;
        }
        let len = usize::try_from(header.frame_len()).ok()?;
        (len <= rest.len()).then_some(len)
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        let rest = buf.get(self.offset..).filter(|rest| !rest.is_empty())?;

        if let Some(kind) = magic_cookie_kind(rest) {
            self.offset += MAGIC_COOKIE_LEN;
            return Some(Frame::Cookie(kind));
        }

        if let Some(len) = self.frame_at(rest) {
            self.offset += len;
            return Some(Frame::Message(&rest[..len]));
        }

        let start = self.offset;
        let end = if self.resync {
            find_magic_cookie(buf, start + 1).unwrap_or(buf.len())
        } else {
            buf.len()
        };
        self.offset = end;
        Some(Frame::Corrupt {
            offset: start,
            bytes: &buf[start..end],
        })
    }
}
