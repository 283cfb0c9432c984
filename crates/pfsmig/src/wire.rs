//! Message tags and wire codecs.
//!
//! Every payload that crosses a rank boundary is encoded explicitly: fixed
//! field order, fixed integer widths, little-endian, length-prefixed strings
//! and tables. No struct is ever byte-blasted, so heterogeneous peers cannot
//! disagree on padding or endianness.
//!
//! Decoding is strict: a truncated or out-of-range payload yields a
//! [`WireError`], which the engines treat as fatal.

use crate::error::WireError;
use crate::layout::{FsKind, Layout};
use crate::task::{Task, TaskKind};
use crate::{MAX_OST, MAX_PATH_LEN};

/// Message tags, stable across all peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Tag {
    /// One serialized [`Task`]; sent synchronously by producers.
    TaskPut = 1000,
    /// `u32` count followed by that many tasks; same rendezvous semantics.
    TaskBatchPut = 1001,
    /// `[ost_id, want]`, both `u32`.
    GetReq = 1002,
    /// `u32` count in `{0, 1}`, then one task when count is 1.
    GetResp = 1003,
    /// Empty; a producer has finished its walk.
    FinProd = 1004,
    /// Empty; an owner has drained and is exiting.
    Done = 1005,
    /// Encoded configuration record, rank 0 to everyone at startup.
    CfgBcast = 1006,
}

impl Tag {
    pub fn from_u32(raw: u32) -> Result<Self, WireError> {
        match raw {
            1000 => Ok(Self::TaskPut),
            1001 => Ok(Self::TaskBatchPut),
            1002 => Ok(Self::GetReq),
            1003 => Ok(Self::GetResp),
            1004 => Ok(Self::FinProd),
            1005 => Ok(Self::Done),
            1006 => Ok(Self::CfgBcast),
            other => Err(WireError::BadTag(other)),
        }
    }
}

// ---------------------------------------------------------------------
// Primitive writer / reader
// ---------------------------------------------------------------------

/// Append-only little-endian byte writer.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// `u16` length prefix + raw bytes. The caller bounds the length.
    pub(crate) fn put_str(&mut self, s: &str) {
        debug_assert!(s.len() <= u16::MAX as usize);
        self.put_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received payload.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn get_str(&mut self) -> Result<String, WireError> {
        let len = self.get_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadUtf8)
    }
}

// ---------------------------------------------------------------------
// Layout / task codecs
// ---------------------------------------------------------------------

fn put_fs_kind(w: &mut Writer, fs: FsKind) {
    w.put_u8(match fs {
        FsKind::Lustre => 1,
        FsKind::Ceph => 2,
        FsKind::BeeGfs => 3,
        FsKind::Generic => 4,
    });
}

fn get_fs_kind(r: &mut Reader<'_>) -> Result<FsKind, WireError> {
    match r.get_u8()? {
        1 => Ok(FsKind::Lustre),
        2 => Ok(FsKind::Ceph),
        3 => Ok(FsKind::BeeGfs),
        4 => Ok(FsKind::Generic),
        other => Err(WireError::BadFsKind(other)),
    }
}

fn put_layout(w: &mut Writer, layout: &Layout) {
    put_fs_kind(w, layout.fs);
    w.put_u64(layout.stripe_size);
    w.put_u32(layout.stripe_count);
    w.put_u32(layout.stripe_start);
    w.put_u32(layout.ost_ids.len() as u32);
    for &ost in &layout.ost_ids {
        w.put_u32(ost);
    }
}

fn get_layout(r: &mut Reader<'_>) -> Result<Layout, WireError> {
    let fs = get_fs_kind(r)?;
    let stripe_size = r.get_u64()?;
    let stripe_count = r.get_u32()?;
    let stripe_start = r.get_u32()?;
    let n = r.get_u32()?;
    if n > MAX_OST {
        return Err(WireError::TooManyOsts(n));
    }
    let mut ost_ids = Vec::with_capacity(n as usize);
    for _ in 0..n {
        ost_ids.push(r.get_u32()?);
    }
    Ok(Layout {
        fs,
        stripe_size,
        stripe_count,
        stripe_start,
        ost_ids,
    })
}

pub(crate) fn put_task(w: &mut Writer, task: &Task) -> Result<(), WireError> {
    if task.path.len() > MAX_PATH_LEN {
        return Err(WireError::PathTooLong(task.path.len()));
    }
    w.put_u8(match task.kind {
        TaskKind::SmallBatchable => 1,
        TaskKind::LargeStripedChunk => 2,
    });
    w.put_u8(u8::from(task.is_logically_contiguous));
    w.put_u32(task.dominant_ost);
    w.put_u32(task.stripe_step);
    w.put_u64(task.size);
    w.put_u64(task.offset);
    w.put_u64(task.stripe_size);
    w.put_str(&task.path);
    w.put_str(&task.pack_key);
    put_layout(w, &task.layout);
    Ok(())
}

pub(crate) fn get_task(r: &mut Reader<'_>) -> Result<Task, WireError> {
    let kind = match r.get_u8()? {
        1 => TaskKind::SmallBatchable,
        2 => TaskKind::LargeStripedChunk,
        other => return Err(WireError::BadKind(other)),
    };
    let is_logically_contiguous = r.get_u8()? != 0;
    let dominant_ost = r.get_u32()?;
    let stripe_step = r.get_u32()?;
    let size = r.get_u64()?;
    let offset = r.get_u64()?;
    let stripe_size = r.get_u64()?;
    let path = r.get_str()?;
    if path.len() > MAX_PATH_LEN {
        return Err(WireError::PathTooLong(path.len()));
    }
    let pack_key = r.get_str()?;
    let layout = get_layout(r)?;
    Ok(Task {
        kind,
        path,
        size,
        offset,
        layout,
        dominant_ost,
        stripe_size,
        stripe_step,
        is_logically_contiguous,
        pack_key,
    })
}

/// `TASK_PUT` payload: one task.
pub fn encode_task(task: &Task) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::new();
    put_task(&mut w, task)?;
    Ok(w.finish())
}

pub fn decode_task(payload: &[u8]) -> Result<Task, WireError> {
    let mut r = Reader::new(payload);
    get_task(&mut r)
}

/// `TASK_BATCH_PUT` payload: count then tasks.
pub fn encode_task_batch(tasks: &[Task]) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::new();
    w.put_u32(tasks.len() as u32);
    for task in tasks {
        put_task(&mut w, task)?;
    }
    Ok(w.finish())
}

pub fn decode_task_batch(payload: &[u8]) -> Result<Vec<Task>, WireError> {
    let mut r = Reader::new(payload);
    let count = r.get_u32()?;
    let mut tasks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        tasks.push(get_task(&mut r)?);
    }
    Ok(tasks)
}

/// `GET_REQ` payload.
pub fn encode_get_req(ost_id: u32, want: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(ost_id);
    w.put_u32(want);
    w.finish()
}

pub fn decode_get_req(payload: &[u8]) -> Result<(u32, u32), WireError> {
    let mut r = Reader::new(payload);
    Ok((r.get_u32()?, r.get_u32()?))
}

/// `GET_RESP` payload: 0-count miss or 1-count hit with the task inline.
pub fn encode_get_resp(task: Option<&Task>) -> Result<Vec<u8>, WireError> {
    let mut w = Writer::new();
    match task {
        None => w.put_u32(0),
        Some(task) => {
            w.put_u32(1);
            put_task(&mut w, task)?;
        }
    }
    Ok(w.finish())
}

pub fn decode_get_resp(payload: &[u8]) -> Result<Option<Task>, WireError> {
    let mut r = Reader::new(payload);
    match r.get_u32()? {
        0 => Ok(None),
        _ => Ok(Some(get_task(&mut r)?)),
    }
}
