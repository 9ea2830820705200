//! File-backed media source and a discarding sink for the video app.
//!
//! Frames are read pre-encoded from an IVF container; nothing here touches a
//! codec.

use std::{
    fs::File,
    io::{self, BufReader, ErrorKind, Read},
    path::Path,
    time::Duration,
};

use tracing::{debug, info};

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const IVF_HEADER_LEN: usize = 32;
const IVF_FRAME_HEADER_LEN: usize = 12;

/// Largest frame accepted from a file.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfHeader {
    pub codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    /// Time base is `numerator / denominator` seconds per pts unit.
    pub timebase_numerator: u32,
    pub timebase_denominator: u32,
    pub frame_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFrame {
    pub pts: u64,
    pub data: Vec<u8>,
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, reason.to_string())
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Reads frames out of an IVF stream.
pub struct IvfReader<R> {
    inner: R,
    header: IvfHeader,
}

impl<R: Read> IvfReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let mut h = [0u8; IVF_HEADER_LEN];
        inner.read_exact(&mut h)?;

        if &h[0..4] != IVF_SIGNATURE {
            return Err(invalid("not an IVF file"));
        }

        let codec = match &h[8..12] {
            b"VP80" => VideoCodec::Vp8,
            b"VP90" => VideoCodec::Vp9,
            _ => return Err(invalid("unsupported IVF fourcc")),
        };

        let header = IvfHeader {
            codec,
            width: u16_at(&h, 12),
            height: u16_at(&h, 14),
            timebase_denominator: u32_at(&h, 16),
            timebase_numerator: u32_at(&h, 20),
            frame_count: u32_at(&h, 24),
        };

        if header.timebase_denominator == 0 {
            return Err(invalid("zero IVF timebase"));
        }

        // The header length field may announce a longer header.
        let header_len = usize::from(u16_at(&h, 6));
        if header_len > IVF_HEADER_LEN {
            io::copy(
                &mut (&mut inner).take((header_len - IVF_HEADER_LEN) as u64),
                &mut io::sink(),
            )?;
        }

        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    /// Next frame, or `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> io::Result<Option<IvfFrame>> {
        let mut fh = [0u8; IVF_FRAME_HEADER_LEN];
        match self.inner.read_exact(&mut fh) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let size = u32_at(&fh, 0) as usize;
        let pts = u64::from_le_bytes([
            fh[4], fh[5], fh[6], fh[7], fh[8], fh[9], fh[10], fh[11],
        ]);

        if size > MAX_FRAME_SIZE {
            return Err(invalid("IVF frame larger than 16 MiB"));
        }

        let mut data = vec![0; size];
        self.inner.read_exact(&mut data)?;

        Ok(Some(IvfFrame { pts, data }))
    }

    /// Presentation time of `pts` in the 90kHz RTP video clock.
    pub fn rtp_ticks(&self, pts: u64) -> u64 {
        let ticks = u128::from(pts) * 90_000 * u128::from(self.header.timebase_numerator)
            / u128::from(self.header.timebase_denominator);
        ticks.min(u128::from(u64::MAX)) as u64
    }

    /// Presentation time of `pts` as an offset from the first frame.
    pub fn offset(&self, pts: u64) -> Duration {
        let nanos = u128::from(pts)
            * 1_000_000_000
            * u128::from(self.header.timebase_numerator)
            / u128::from(self.header.timebase_denominator);
        Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
    }
}

/// An opened video file, looping back to the start when it runs out.
pub struct FileSource {
    path: std::path::PathBuf,
    reader: IvfReader<BufReader<File>>,
    /// Pts offset added after each loop, so the clock keeps increasing.
    loop_base: u64,
    last_pts: u64,
}

/// A frame ready to be written, with its send time relative to stream start.
#[derive(Debug)]
pub struct TimedFrame {
    pub at: Duration,
    pub rtp_ticks: u64,
    pub data: Vec<u8>,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let reader = IvfReader::new(BufReader::new(File::open(path)?))?;
        info!(
            "Opened {} ({:?} {}x{}, {} frames)",
            path.display(),
            reader.header().codec,
            reader.header().width,
            reader.header().height,
            reader.header().frame_count
        );
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            loop_base: 0,
            last_pts: 0,
        })
    }

    pub fn codec(&self) -> VideoCodec {
        self.reader.header().codec
    }

    pub fn next_frame(&mut self) -> io::Result<TimedFrame> {
        let frame = match self.reader.next_frame()? {
            Some(frame) => frame,
            None => {
                debug!("Reached end of {}, looping", self.path.display());
                self.loop_base = self.loop_base.saturating_add(self.last_pts.saturating_add(1));
                self.reader = IvfReader::new(BufReader::new(File::open(&self.path)?))?;
                self.reader
                    .next_frame()?
                    .ok_or_else(|| invalid("IVF file has no frames"))?
            }
        };

        self.last_pts = frame.pts;
        let pts = self.loop_base.saturating_add(frame.pts);

        Ok(TimedFrame {
            at: self.reader.offset(pts),
            rtp_ticks: self.reader.rtp_ticks(pts),
            data: frame.data,
        })
    }
}

/// Counts and drops incoming media.
#[derive(Debug, Default)]
pub struct BlackholeSink {
    pub frames: u64,
    pub bytes: u64,
}

impl BlackholeSink {
    pub fn consume(&mut self, data: &[u8]) {
        self.frames += 1;
        self.bytes += data.len() as u64;
        if self.frames % 300 == 1 {
            debug!(
                "Blackhole sink: {} frames, {} bytes",
                self.frames, self.bytes
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivf(frames: &[(u64, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DKIF");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(b"VP80");
        out.extend_from_slice(&640u16.to_le_bytes());
        out.extend_from_slice(&480u16.to_le_bytes());
        out.extend_from_slice(&30u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for (pts, data) in frames {
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&pts.to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn reads_header_and_frames() {
        let bytes = ivf(&[(0, b"abc"), (1, b"de")]);
        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();

        assert_eq!(reader.header().codec, VideoCodec::Vp8);
        assert_eq!(reader.header().width, 640);
        assert_eq!(reader.header().frame_count, 2);

        let first = reader.next_frame().unwrap().unwrap();
        assert_eq!(first, IvfFrame { pts: 0, data: b"abc".to_vec() });
        let second = reader.next_frame().unwrap().unwrap();
        assert_eq!(second.pts, 1);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn converts_pts_to_clocks() {
        let bytes = ivf(&[]);
        let reader = IvfReader::new(bytes.as_slice()).unwrap();

        assert_eq!(reader.rtp_ticks(30), 90_000);
        assert_eq!(reader.offset(15), Duration::from_millis(500));
    }

    #[test]
    fn huge_pts_saturates() {
        let bytes = ivf(&[(1 << 50, b"abc"), (u64::MAX, b"de")]);
        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();

        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(reader.rtp_ticks(frame.pts), (1u64 << 50) * 3_000);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(reader.rtp_ticks(frame.pts), u64::MAX);
        assert_eq!(reader.offset(frame.pts), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut bytes = ivf(&[]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();

        let err = reader.next_frame().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_other_containers() {
        let mut bytes = ivf(&[]);
        bytes[0] = b'X';
        assert!(IvfReader::new(bytes.as_slice()).is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut bytes = ivf(&[(0, b"abcdef")]);
        bytes.truncate(bytes.len() - 2);
        let mut reader = IvfReader::new(bytes.as_slice()).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn sink_counts() {
        let mut sink = BlackholeSink::default();
        sink.consume(b"abc");
        sink.consume(b"de");
        assert_eq!((sink.frames, sink.bytes), (2, 5));
    }
}
