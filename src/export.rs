/// CSV export of stored samples
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::models::Sample;
use crate::utils::format_timestamp;

const HEADER: &str = "index;timestamp;temperature;humidity;pressure;CO2";

/// Write `samples` as semicolon-separated rows, one per sample
pub fn write_csv<W: Write>(mut w: W, samples: &[Sample]) -> io::Result<()> {
    writeln!(w, "{}", HEADER)?;
    for (i, s) in samples.iter().enumerate() {
        writeln!(
            w,
            "{};{};{:.2};{};{:.1};{}",
            i,
            format_timestamp(&s.time),
            s.temperature,
            s.humidity,
            s.pressure,
            s.co2
        )?;
    }
    w.flush()
}

/// Replace the file at `path` with a CSV export of `samples`
pub fn export_csv(path: &Path, samples: &[Sample]) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), samples)
}
