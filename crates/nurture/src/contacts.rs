//! Contact list input
//!
//! The engine reads its leads from a [`ContactSource`]. The standard source
//! is a CSV file with a header row:
//!
//! ```text
//! to,first_name,company,cc,bcc,attachments
//! ann@acme.com,Ann,Acme,bob@acme.com;carol@acme.com,,deck.pdf
//! ```
//!
//! Fields follow RFC 4180 quoting. `cc`, `bcc` and `attachments` hold lists
//! separated by `;` or `,`. Rows without a usable address are skipped with a
//! warning.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::models::{Contact, LeadEmail};

/// Contact list filename in the data directory
pub const CONTACTS_FILE: &str = "contacts.csv";

/// Where leads come from
pub trait ContactSource: Send + Sync {
    /// Load the full contact list
    fn load(&self) -> Result<Vec<Contact>>;
}

/// A fixed list of contacts, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticContacts(pub Vec<Contact>);

impl ContactSource for StaticContacts {
    fn load(&self) -> Result<Vec<Contact>> {
        Ok(self.0.clone())
    }
}

/// CSV file contact list
#[derive(Debug, Clone)]
pub struct CsvContactSource {
    path: PathBuf,
}

impl CsvContactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContactSource for CsvContactSource {
    fn load(&self) -> Result<Vec<Contact>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read contact list: {}", self.path.display()))?;
        let contacts = parse_contacts(&text)
            .with_context(|| format!("Failed to parse contact list: {}", self.path.display()))?;
        debug!(
            "Loaded {} contact(s) from {}",
            contacts.len(),
            self.path.display()
        );
        Ok(contacts)
    }
}

/// Column positions resolved from the header row
struct Columns {
    email: usize,
    first_name: Option<usize>,
    company: Option<usize>,
    cc: Option<usize>,
    bcc: Option<usize>,
    attachments: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Result<Self> {
        let find = |names: &[&str]| {
            header.iter().position(|h| {
                let h = h.trim().to_ascii_lowercase();
                names.iter().any(|n| *n == h)
            })
        };

        let Some(email) = find(&["to", "email", "email_address"]) else {
            bail!("Contact list header has no 'to' column");
        };

        Ok(Self {
            email,
            first_name: find(&["first_name", "firstname", "name"]),
            company: find(&["company", "organization"]),
            cc: find(&["cc"]),
            bcc: find(&["bcc"]),
            attachments: find(&["attachments", "attachment"]),
        })
    }
}

/// Parse a contact list
///
/// Only a missing header is an error. Bad rows are logged and skipped.
pub fn parse_contacts(text: &str) -> Result<Vec<Contact>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = parse_records(text).into_iter();

    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(&header)?;

    let mut contacts = Vec::new();
    for (index, row) in records.enumerate() {
        // Header is line 1
        let line = index + 2;
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let field = |i: Option<usize>| {
            i.and_then(|i| row.get(i))
                .map(|f| f.trim().to_string())
                .unwrap_or_default()
        };

        let raw_email = field(Some(columns.email));
        if !looks_like_address(&raw_email) {
            warn!("Skipping contact row {}: invalid address '{}'", line, raw_email);
            continue;
        }

        contacts.push(Contact {
            email: LeadEmail::new(&raw_email),
            first_name: field(columns.first_name),
            company: field(columns.company),
            cc: split_list(&field(columns.cc)),
            bcc: split_list(&field(columns.bcc)),
            attachments: split_list(&field(columns.attachments)),
        });
    }

    Ok(contacts)
}

fn looks_like_address(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Split a `;` or `,` separated list, dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Split CSV text into records of fields (RFC 4180)
///
/// Quoted fields may contain separators, doubled quotes and line breaks.
/// An unterminated quote runs to the end of the input.
fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_basic_list() {
        let text = "to,first_name,company\nAnn@Acme.com,Ann,Acme\nbob@beta.io,Bob,Beta\n";
        let contacts = parse_contacts(text).unwrap();

        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].email.as_str(), "ann@acme.com");
        assert_eq!(contacts[0].first_name, "Ann");
        assert_eq!(contacts[1].company, "Beta");
    }

    #[test]
    fn test_quoted_fields_and_lists() {
        let text = "\u{feff}first_name,to,company,cc,attachments\r\n\
                    \"Doe, Jane\",jane@x.com,\"The \"\"Best\"\" Co\",\"a@x.com; b@x.com\",deck.pdf\r\n";
        let contacts = parse_contacts(text).unwrap();

        assert_eq!(contacts.len(), 1);
        let jane = &contacts[0];
        assert_eq!(jane.first_name, "Doe, Jane");
        assert_eq!(jane.company, "The \"Best\" Co");
        assert_eq!(jane.cc, vec!["a@x.com", "b@x.com"]);
        assert_eq!(jane.attachments, vec!["deck.pdf"]);
        assert!(jane.bcc.is_empty());
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let text = "to,first_name,company\nnot-an-address,X,Y\n\n,,\nok@x.com,Ok,\n";
        let contacts = parse_contacts(text).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email.as_str(), "ok@x.com");
    }

    #[test]
    fn test_missing_to_column_is_error() {
        assert!(parse_contacts("first_name,company\nAnn,Acme\n").is_err());
        assert!(parse_contacts("").unwrap().is_empty());
    }

    #[test]
    fn test_multiline_quoted_field() {
        let records = parse_records("a,\"line1\nline2\",c\nd,e,f");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][1], "line1\nline2");
        assert_eq!(records[1], vec!["d", "e", "f"]);
    }

    #[test]
    fn test_csv_source_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONTACTS_FILE);
        std::fs::write(&path, "to,first_name,company\nann@acme.com,Ann,Acme\n").unwrap();

        let contacts = CsvContactSource::new(&path).load().unwrap();
        assert_eq!(contacts.len(), 1);

        assert!(CsvContactSource::new(dir.path().join("missing.csv")).load().is_err());
    }
}
