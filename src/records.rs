//! Reading subjects from input files and writing results.
//!
//! Two input formats are understood:
//! * a names CSV (name, optional affiliation), and
//! * the links file written by the `search` command: an `identifier:` line
//!   followed by one URL per line, entries separated by blank lines.
//!   Subjects read from it are never searched again, even when their entry
//!   is `(no results)`.

use crate::error::Result;
use crate::models::{EmailMatch, Subject};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Placeholder line written for a subject whose search found nothing.
const NO_RESULTS: &str = "(no results)";

/// Destination for per-subject results.
pub(crate) trait ResultSink {
    fn write_result(&mut self, result: &EmailMatch) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Destination for discovered links.
pub(crate) trait LinkSink {
    fn write_links(&mut self, identifier: &str, links: &[String]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Loads subjects from `path`, choosing the parser by extension.
pub(crate) fn read_subjects(path: &Path) -> Result<Vec<Subject>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let subjects = if is_csv {
        read_names_csv(File::open(path)?)?
    } else {
        parse_links_file(&fs::read_to_string(path)?)
    };

    tracing::info!("Loaded {} subjects from {}", subjects.len(), path.display());
    Ok(subjects)
}

/// Parses a names CSV: column 1 is the name, column 2 an optional affiliation.
/// A first row mentioning both "name" and "institution" is treated as a header.
pub(crate) fn read_names_csv<R: Read>(reader: R) -> Result<Vec<Subject>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut subjects = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record?;
        let name = record.get(0).unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        if index == 0 {
            let joined = record.iter().collect::<Vec<_>>().join(",").to_lowercase();
            if joined.contains("name") && joined.contains("institution") {
                continue;
            }
        }

        let identifier = match record.get(1).map(str::trim).filter(|a| !a.is_empty()) {
            Some(affiliation) => format!("{} {}", name, affiliation),
            None => name.to_string(),
        };
        subjects.push(Subject::new(identifier));
    }
    Ok(subjects)
}

/// Parses the links file format.
pub(crate) fn parse_links_file(content: &str) -> Vec<Subject> {
    let mut subjects: Vec<Subject> = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line == NO_RESULTS {
            continue;
        }
        let is_identifier = line.ends_with(':') && !line.starts_with("http");
        if is_identifier {
            let identifier = line.trim_end_matches(':').trim();
            subjects.push(Subject::resolved(identifier));
        } else if let Some(current) = subjects.last_mut() {
            current.candidate_urls.push(line.to_string());
        } else {
            tracing::warn!("Ignoring URL before any identifier line: {}", line);
        }
    }

    subjects
}

/// Creates the output file, including missing parent directories.
pub(crate) fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

/// Writes `Name and Institution,Email` rows.
pub(crate) struct CsvResultSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvResultSink<W> {
    pub(crate) fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(["Name and Institution", "Email"])?;
        Ok(Self { writer })
    }
}

impl<W: Write> ResultSink for CsvResultSink<W> {
    fn write_result(&mut self, result: &EmailMatch) -> Result<()> {
        self.writer
            .write_record([result.identifier.as_str(), result.email.as_str()])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the links file consumed by `find`.
pub(crate) struct LinksFileWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> LinksFileWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }
}

impl<W: Write> LinkSink for LinksFileWriter<W> {
    fn write_links(&mut self, identifier: &str, links: &[String]) -> Result<()> {
        writeln!(self.writer, "{}:", identifier)?;
        if links.is_empty() {
            writeln!(self.writer, "{}", NO_RESULTS)?;
        }
        for link in links {
            writeln!(self.writer, "{}", link)?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
