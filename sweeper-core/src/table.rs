//! Text table import/export of measurement tracks.
//!
//! Format: optional `#` comment lines, an optional `frequency_hz,level_db`
//! column header, then one `frequency,level` row per bucket. Frequencies are
//! written with 2 decimals, levels with 3.

use anyhow::{Context, Result};
use std::io::{Read, Write};

use crate::frequency_map::FrequencyMap;

pub const COLUMN_HEADER: [&str; 2] = ["frequency_hz", "level_db"];

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Rows written into the track.
    pub applied: usize,
    /// Rows that failed to parse or validate.
    pub skipped: usize,
}

/// Writes a track as a text table.
///
/// # Arguments
/// * `writer` - destination, flushed before returning
/// * `title` - written as the `#` comment line, may be empty
/// * `rows` - `(frequency_hz, level_db)` in bucket order
pub fn write_table<W, I>(mut writer: W, title: &str, rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (f64, f32)>,
{
    if !title.is_empty() {
        for line in title.lines() {
            writeln!(writer, "# {}", line).context("failed to write table header")?;
        }
    }

    let mut csv = csv::Writer::from_writer(&mut writer);
    csv.write_record(COLUMN_HEADER)?;
    for (hz, db) in rows {
        csv.write_record([format!("{:.2}", hz), format!("{:.3}", db)])?;
    }
    csv.flush().context("failed to write table rows")?;
    drop(csv);
    writer.flush()?;
    Ok(())
}

/// Parses a text table into `(bucket, level_db)` pairs.
///
/// A row is accepted when both fields parse, the frequency falls in a bucket
/// of `map` and the level lies in `[floor_db, ceiling_db]`. Everything else is
/// counted as skipped, except a non-numeric first row, which is taken as the
/// column header. Only I/O failures abort the import.
pub fn read_table<R: Read>(
    reader: R,
    map: &FrequencyMap,
    floor_db: f32,
    ceiling_db: f32,
) -> Result<(Vec<(usize, f32)>, ImportReport)> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut levels = Vec::new();
    let mut report = ImportReport::default();
    for (index, record) in csv.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e).context("failed to read table"),
            Err(_) => {
                report.skipped += 1;
                continue;
            }
        };

        let parsed = match (record.get(0), record.get(1)) {
            (Some(hz), Some(db)) => hz.parse::<f64>().ok().zip(db.parse::<f32>().ok()),
            _ => None,
        };
        let Some((hz, db)) = parsed else {
            if index > 0 {
                report.skipped += 1;
            }
            continue;
        };

        match map.audible_bucket(hz) {
            Some(bucket) if db >= floor_db && db <= ceiling_db => {
                levels.push((bucket, db));
                report.applied += 1;
            }
            _ => report.skipped += 1,
        }
    }
    Ok((levels, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn map() -> FrequencyMap {
        FrequencyMap::new(&EngineConfig::default())
    }

    #[test]
    fn writes_header_and_rounded_rows() {
        let mut out = Vec::new();
        write_table(&mut out, "track 1", [(20.27171, -42.12345f32), (1000.0, 0.0)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "# track 1\nfrequency_hz,level_db\n20.27,-42.123\n1000.00,0.000\n"
        );
    }

    #[test]
    fn round_trip_through_export() {
        let map = map();
        let rows: Vec<(f64, f32)> = (0..map.bucket_count())
            .map(|i| (map.bucket_to_hz(i), -90.0 + i as f32 * 0.3456))
            .collect();
        let mut out = Vec::new();
        write_table(&mut out, "sweep", rows.iter().copied()).unwrap();

        let (levels, report) = read_table(out.as_slice(), &map, -90.0, 0.0).unwrap();
        assert_eq!(report, ImportReport { applied: 256, skipped: 0 });
        for (i, &(bucket, db)) in levels.iter().enumerate() {
            assert_eq!(bucket, i);
            assert!((db - rows[i].1).abs() < 1e-3);
        }
    }

    #[test]
    fn invalid_rows_are_counted() {
        let text = "\
# measured
frequency_hz,level_db
100.0,-20.0
abc,-20.0
5.0,-20.0
25000.0,-10.0
1000.0,12.0
2000.0
3000.0,-30.0,extra
";
        let (levels, report) = read_table(text.as_bytes(), &map(), -90.0, 0.0).unwrap();
        assert_eq!(report, ImportReport { applied: 2, skipped: 5 });
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].1, -20.0);
        assert_eq!(levels[1].1, -30.0);
    }

    #[test]
    fn headerless_table_is_accepted() {
        let (levels, report) = read_table("440,-6.5\n".as_bytes(), &map(), -90.0, 0.0).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(levels[0].0, map().hz_to_bucket(440.0).unwrap());
    }

    #[test]
    fn upper_audible_bound_is_imported() {
        let map = map();
        let (levels, report) = read_table("20000.00,-40.0\n".as_bytes(), &map, -90.0, 0.0).unwrap();
        assert_eq!(report, ImportReport { applied: 1, skipped: 0 });
        assert_eq!(levels, vec![(map.bucket_count() - 1, -40.0)]);
    }
}
