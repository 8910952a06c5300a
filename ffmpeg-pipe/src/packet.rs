use ffmpeg_next::{Rational, ffi};

use crate::{
    error::Result,
    handle::{Handle, Resource},
};

pub struct PacketKind;

unsafe impl Resource for PacketKind {
    type Raw = ffi::AVPacket;
    const NAME: &'static str = "packet";

    unsafe fn release(raw: *mut ffi::AVPacket) {
        let mut raw = raw;
        // av_packet_free unrefs the payload before freeing the struct
        unsafe { ffi::av_packet_free(&mut raw) };
    }
}

/// A compressed unit together with the time base its timestamps are in.
pub struct Packet {
    handle: Handle<PacketKind>,
    time_base: Rational,
}

impl Packet {
    pub fn alloc(time_base: Rational) -> Result<Self> {
        let handle = unsafe { Handle::from_raw(ffi::av_packet_alloc())? };
        Ok(Self { handle, time_base })
    }

    pub fn pts(&self) -> Option<i64> {
        ts(self.handle.get().pts)
    }

    pub fn dts(&self) -> Option<i64> {
        ts(self.handle.get().dts)
    }

    pub fn duration(&self) -> i64 {
        self.handle.get().duration
    }

    pub fn size(&self) -> usize {
        self.handle.get().size.max(0) as usize
    }

    pub fn stream_index(&self) -> usize {
        self.handle.get().stream_index.max(0) as usize
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.handle.get_mut().stream_index = index as i32;
    }

    pub fn is_key(&self) -> bool {
        self.handle.get().flags & ffi::AV_PKT_FLAG_KEY as i32 != 0
    }

    /// Byte position in the source; -1 when unknown.
    pub fn set_pos(&mut self, pos: i64) {
        self.handle.get_mut().pos = pos;
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    /// Converts pts/dts/duration into `time_base` and records it.
    pub fn rescale_ts(&mut self, time_base: Rational) {
        if self.time_base == time_base {
            return;
        }
        unsafe {
            ffi::av_packet_rescale_ts(
                self.handle.as_mut_ptr(),
                self.time_base.into(),
                time_base.into(),
            )
        };
        self.time_base = time_base;
    }

    pub fn data(&self) -> &[u8] {
        let size = self.size();
        let data = self.handle.get().data;
        if data.is_null() || size == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(data, size) }
    }

    pub fn as_ptr(&self) -> *const ffi::AVPacket {
        self.handle.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut ffi::AVPacket {
        self.handle.as_mut_ptr()
    }
}

fn ts(value: i64) -> Option<i64> {
    if value == ffi::AV_NOPTS_VALUE {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_packet_is_empty() {
        let packet = Packet::alloc(Rational::new(1, 30)).unwrap();
        assert_eq!(packet.size(), 0);
        assert!(packet.data().is_empty());
        assert_eq!(packet.pts(), None);
        assert_eq!(packet.dts(), None);
        assert_eq!(packet.time_base(), Rational::new(1, 30));
    }

    #[test]
    fn test_rescale_ts() {
        let mut packet = Packet::alloc(Rational::new(1, 30)).unwrap();
        packet.handle.get_mut().pts = 3;
        packet.handle.get_mut().dts = 2;
        packet.rescale_ts(Rational::new(1, 90000));
        assert_eq!(packet.pts(), Some(9000));
        assert_eq!(packet.dts(), Some(6000));
        assert_eq!(packet.time_base(), Rational::new(1, 90000));
    }

    #[test]
    fn test_stream_index() {
        let mut packet = Packet::alloc(Rational::new(1, 25)).unwrap();
        packet.set_stream_index(2);
        assert_eq!(packet.stream_index(), 2);
    }
}
