use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{PrepareError, PrepareResult};

pub const REQUIRED_COLUMNS: &[&str] = &[
    "youtube_id",
    "cut",
    "frame_id",
    "y1",
    "y2",
    "x1",
    "x2",
    "resolution",
];

/// Frame size of the original, uncropped video.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse the `(width, height)` tuple literal used in detection tables.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut parts = inner.split(',').map(str::trim);
        let width = parts.next()?.parse().ok()?;
        let height = parts.next()?.parse().ok()?;
        if parts.next().is_some_and(|rest| !rest.is_empty()) {
            return None;
        }
        Some(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.width, self.height)
    }
}

/// Absolute pixel rectangle, half-open on the right and bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }
}

/// One detected face in one frame of one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub youtube_id: String,
    pub cut: u32,
    pub frame_id: u64,
    pub y1: f64,
    pub y2: f64,
    pub x1: f64,
    pub x2: f64,
    pub resolution: Resolution,
}

impl DetectionRecord {
    pub fn segment_key(&self) -> SegmentKey {
        (self.youtube_id.clone(), self.cut)
    }

    /// Relative box scaled to the stored resolution, truncating toward zero.
    pub fn pixel_box(&self) -> PixelBox {
        let w = self.resolution.width as f64;
        let h = self.resolution.height as f64;
        let px = |rel: f64, size: f64| (rel * size).max(0.0) as u32;
        PixelBox {
            x1: px(self.x1, w),
            y1: px(self.y1, h),
            x2: px(self.x2, w),
            y2: px(self.y2, h),
        }
    }
}

pub type SegmentKey = (String, u32);

#[derive(Debug, Deserialize, Serialize)]
struct Row {
    youtube_id: String,
    cut: u32,
    frame_id: u64,
    y1: f64,
    y2: f64,
    x1: f64,
    x2: f64,
    resolution: String,
}

/// Detection Records of one table, grouped by `(youtube_id, cut)` and
/// indexed by `frame_id`.
#[derive(Debug, Default)]
pub struct DetectionTable {
    segments: BTreeMap<SegmentKey, HashMap<u64, DetectionRecord>>,
}

impl DetectionTable {
    pub fn read(path: &Path) -> PrepareResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| PrepareError::io(path, e))?;
        Self::from_reader(path, file)
    }

    /// Parse CSV from `reader`; `path` is only used in error messages.
    pub fn from_reader<R: Read>(path: &Path, reader: R) -> PrepareResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| PrepareError::malformed(path, e.to_string()))?
            .clone();
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h.trim() == *col))
            .collect();
        if !missing.is_empty() {
            return Err(PrepareError::malformed(
                path,
                format!("missing columns: {}", missing.join(", ")),
            ));
        }

        let mut table = Self::default();
        for (i, result) in rdr.deserialize::<Row>().enumerate() {
            let line = i + 2;
            let row = result.map_err(|e| PrepareError::malformed(path, format!("line {line}: {e}")))?;
            let resolution = Resolution::parse(&row.resolution).ok_or_else(|| {
                PrepareError::malformed(
                    path,
                    format!("line {line}: bad resolution {:?}", row.resolution),
                )
            })?;
            let record = DetectionRecord {
                youtube_id: row.youtube_id,
                cut: row.cut,
                frame_id: row.frame_id,
                y1: row.y1,
                y2: row.y2,
                x1: row.x1,
                x2: row.x2,
                resolution,
            };
            table.insert(record).map_err(|reason| {
                PrepareError::malformed(path, format!("line {line}: {reason}"))
            })?;
        }

        Ok(table)
    }

    fn insert(&mut self, record: DetectionRecord) -> Result<(), String> {
        let frames = self.segments.entry(record.segment_key()).or_default();
        if frames.contains_key(&record.frame_id) {
            return Err(format!(
                "duplicate frame_id {} for {}/cut-{}",
                record.frame_id, record.youtube_id, record.cut
            ));
        }
        frames.insert(record.frame_id, record);
        Ok(())
    }

    pub fn from_records(records: impl IntoIterator<Item = DetectionRecord>) -> Result<Self, String> {
        let mut table = Self::default();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    pub fn youtube_ids(&self) -> HashSet<&str> {
        self.segments.keys().map(|(id, _)| id.as_str()).collect()
    }

    pub fn segment(&self, youtube_id: &str, cut: u32) -> Option<&HashMap<u64, DetectionRecord>> {
        self.segments.get(&(youtube_id.to_string(), cut))
    }

    /// All records, ordered by segment.
    pub fn records(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.segments.values().flat_map(HashMap::values)
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_records(&self) -> usize {
        self.segments.values().map(HashMap::len).sum()
    }
}

/// Write records sorted by segment and frame, with the table's column layout.
pub fn write_records<W: Write>(writer: W, records: &[DetectionRecord]) -> csv::Result<()> {
    let mut sorted: Vec<&DetectionRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (a.youtube_id.as_str(), a.cut, a.frame_id).cmp(&(b.youtube_id.as_str(), b.cut, b.frame_id))
    });

    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(REQUIRED_COLUMNS)?;
    for r in sorted {
        wtr.serialize(Row {
            youtube_id: r.youtube_id.clone(),
            cut: r.cut,
            frame_id: r.frame_id,
            y1: round4(r.y1),
            y2: round4(r.y2),
            x1: round4(r.x1),
            x2: round4(r.x2),
            resolution: r.resolution.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_records_file(path: &Path, records: &[DetectionRecord]) -> PrepareResult<()> {
    let file = std::fs::File::create(path).map_err(|e| PrepareError::io(path, e))?;
    write_records(std::io::BufWriter::new(file), records).map_err(|e| PrepareError::encode(path, e))
}

/// Coordinates are stored with four decimals.
fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
y1,y2,x1,x2,frame_id,youtube_id,cut,resolution,score
0.1,0.5,0.2,0.6,5,abc,0,\"(640, 480)\",0.99
0.1,0.5,0.2,0.6,7,abc,0,\"(640, 480)\",0.98
0.2,0.4,0.3,0.5,0,xyz,3,\"(1280, 720)\",0.97
";

    fn parse(text: &str) -> PrepareResult<DetectionTable> {
        DetectionTable::from_reader(Path::new("chess-test.csv"), text.as_bytes())
    }

    #[test]
    fn parses_and_groups_by_segment() {
        let table = parse(TABLE).unwrap();
        assert_eq!(table.num_segments(), 2);
        assert_eq!(table.num_records(), 3);

        let abc = table.segment("abc", 0).unwrap();
        assert_eq!(abc.len(), 2);
        let r = &abc[&5];
        assert_eq!(r.resolution, Resolution::new(640, 480));
        assert_eq!(r.x2, 0.6);

        assert!(table.segment("abc", 1).is_none());
        let ids = table.youtube_ids();
        assert!(ids.contains("abc") && ids.contains("xyz"));
    }

    #[test]
    fn pixel_box_truncates() {
        let table = parse(TABLE).unwrap();
        let r = &table.segment("abc", 0).unwrap()[&5];
        assert_eq!(
            r.pixel_box(),
            PixelBox {
                x1: 128,
                y1: 48,
                x2: 384,
                y2: 240
            }
        );
        assert_eq!(r.pixel_box().width(), 256);
        assert_eq!(r.pixel_box().height(), 192);
    }

    #[test]
    fn missing_column_is_malformed() {
        let err = parse("youtube_id,cut,frame_id,y1,y2,x1,x2\nabc,0,1,0,1,0,1\n").unwrap_err();
        match err {
            PrepareError::MalformedRecord { reason, .. } => assert!(reason.contains("resolution")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_file_is_malformed() {
        assert!(matches!(parse(""), Err(PrepareError::MalformedRecord { .. })));
    }

    #[test]
    fn bad_values_are_malformed() {
        let header = "youtube_id,cut,frame_id,y1,y2,x1,x2,resolution\n";
        for row in [
            "abc,0,one,0,1,0,1,\"(1, 1)\"\n",
            "abc,0,1,0,1,0,1,\"640x480\"\n",
            "abc,0,1,0,1,0,1,\"(640, 480, 3)\"\n",
        ] {
            let text = format!("{header}{row}");
            assert!(matches!(parse(&text), Err(PrepareError::MalformedRecord { .. })), "{row}");
        }
    }

    #[test]
    fn duplicate_frame_is_malformed() {
        let text = "youtube_id,cut,frame_id,y1,y2,x1,x2,resolution\n\
                    abc,0,1,0,1,0,1,\"(2, 2)\"\n\
                    abc,0,1,0,1,0,1,\"(2, 2)\"\n";
        assert!(matches!(parse(text), Err(PrepareError::MalformedRecord { .. })));
    }

    #[test]
    fn header_only_table_is_empty() {
        let table = parse("youtube_id,cut,frame_id,y1,y2,x1,x2,resolution\n").unwrap();
        assert_eq!(table.num_segments(), 0);
    }

    #[test]
    fn written_records_read_back() {
        let table = parse(TABLE).unwrap();
        let mut records: Vec<DetectionRecord> = table.records().cloned().collect();
        records.reverse();

        let mut buf = Vec::new();
        write_records(&mut buf, &records).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("youtube_id,cut,frame_id,y1,y2,x1,x2,resolution\nabc,0,5,"));

        let reread = parse(&text).unwrap();
        assert_eq!(reread.segment("xyz", 3), table.segment("xyz", 3));
        assert_eq!(reread.num_records(), 3);
    }
}
