use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The columns an import sheet must have, matched case-insensitively
/// against its header row.
pub const COLUMNS: [&str; 5] = ["name", "email", "phone", "address", "password"];

/// One data row of an import sheet, as raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub password: String,
}

impl ImportRow {
    fn non_empty(value: &str) -> Option<&str> {
        Some(value).filter(|v| !v.trim().is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        Self::non_empty(&self.name)
    }

    pub fn email(&self) -> Option<&str> {
        Self::non_empty(&self.email)
    }

    pub fn phone(&self) -> Option<&str> {
        Self::non_empty(&self.phone)
    }

    pub fn address(&self) -> Option<&str> {
        Self::non_empty(&self.address)
    }
}

/// Render a cell as the text a person would have typed into it.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// Like [`cell_text`], but keeps surrounding whitespace in text cells.
/// Passwords are taken exactly as typed.
fn cell_raw(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        other => cell_text(other),
    }
}

/// Read the first sheet of a spreadsheet (xlsx, xls, ods).
pub fn read_workbook(bytes: Vec<u8>) -> Result<Vec<ImportRow>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| Error::Validation(format!("Could not read spreadsheet: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Validation("Spreadsheet has no sheets".to_string()))?
        .map_err(|e| Error::Validation(format!("Could not read spreadsheet: {e}")))?;
    rows_from_range(&range)
}

/// Turn a sheet into rows, using its first row as the header. Blank rows
/// are dropped.
pub fn rows_from_range(range: &Range<Data>) -> Result<Vec<ImportRow>> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header
        .iter()
        .map(|cell| cell_text(cell).to_lowercase())
        .collect();

    let mut indices = [0_usize; COLUMNS.len()];
    for (slot, column) in indices.iter_mut().zip(COLUMNS) {
        *slot = header
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| Error::Validation(format!("Missing column: {column}")))?;
    }
    let [name, email, phone, address, password] = indices;

    let text_at = |row: &[Data], index: usize| row.get(index).map(cell_text).unwrap_or_default();
    Ok(rows
        .filter(|row| row.iter().any(|cell| !cell_text(cell).is_empty()))
        .map(|row| ImportRow {
            name: text_at(row, name),
            email: text_at(row, email),
            phone: text_at(row, phone),
            address: text_at(row, address),
            password: row.get(password).map(cell_raw).unwrap_or_default(),
        })
        .collect())
}

/// A row skipped because the user already exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlreadyUser {
    pub email: String,
    pub name: String,
    pub status: String,
}

/// A row skipped for any other reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUser {
    pub email: String,
    pub name: String,
    pub error: String,
}

/// Response of `POST /api/auth/upload-users`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub message: String,
    pub inserted: usize,
    pub skipped: usize,
    pub already_users: Vec<AlreadyUser>,
    pub failed_users: Vec<FailedUser>,
    pub total: usize,
}

impl ImportSummary {
    pub fn new(total: usize) -> Self {
        Self {
            message: "Users uploaded successfully".to_string(),
            total,
            ..Self::default()
        }
    }

    pub fn record_inserted(&mut self) {
        self.inserted += 1;
    }

    pub fn record_existing(&mut self, row: &ImportRow) {
        self.skipped += 1;
        self.already_users.push(AlreadyUser {
            email: row.email.clone(),
            name: row.name.clone(),
            status: "Already Exists".to_string(),
        });
    }

    pub fn record_failure(&mut self, row: &ImportRow, error: &Error) {
        self.skipped += 1;
        self.failed_users.push(FailedUser {
            email: row.email.clone(),
            name: row.name.clone(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(cells: &[&[Data]]) -> Range<Data> {
        let height = cells.len() as u32;
        let width = cells.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (height - 1, width - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    fn s(text: &str) -> Data {
        Data::String(text.to_string())
    }

    #[test]
    fn header_is_case_insensitive_and_order_free() {
        let range = sheet(&[
            &[s("Email"), s("NAME"), s("Password"), s("phone"), s("Address")],
            &[
                s("a@b.co"),
                s("Asha"),
                s("password1"),
                Data::Float(9876543210.0),
                s("Kolkata"),
            ],
        ]);
        let rows = rows_from_range(&range).unwrap();
        assert_eq!(
            rows,
            vec![ImportRow {
                name: "Asha".into(),
                email: "a@b.co".into(),
                phone: "9876543210".into(),
                address: "Kolkata".into(),
                password: "password1".into(),
            }]
        );
    }

    #[test]
    fn blank_rows_are_dropped_and_short_rows_padded() {
        let range = sheet(&[
            &[s("name"), s("email"), s("phone"), s("address"), s("password")],
            &[Data::Empty, Data::Empty, Data::Empty, Data::Empty, Data::Empty],
            &[s("Mei"), s("m@c.co"), Data::Int(447700900123), Data::Empty, Data::Empty],
        ]);
        let rows = rows_from_range(&range).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phone, "447700900123");
        assert_eq!(rows[0].address(), None);
        assert_eq!(rows[0].name(), Some("Mei"));
    }

    #[test]
    fn passwords_keep_their_whitespace() {
        let range = sheet(&[
            &[s("name"), s("email"), s("phone"), s("address"), s("password")],
            &[s(" Mei "), s("m@c.co"), s("447700900123"), s("Leeds"), s(" padded pw ")],
        ]);
        let rows = rows_from_range(&range).unwrap();
        assert_eq!(rows[0].name, "Mei");
        assert_eq!(rows[0].password, " padded pw ");
    }

    #[test]
    fn missing_column_is_a_validation_error() {
        let range = sheet(&[&[s("name"), s("email"), s("phone"), s("address")]]);
        let err = rows_from_range(&range).unwrap_err();
        assert_eq!(err.to_string(), "Missing column: password");
    }

    #[test]
    fn empty_sheet_has_no_rows() {
        let range: Range<Data> = Range::empty();
        assert!(rows_from_range(&range).unwrap().is_empty());
    }

    #[test]
    fn garbage_bytes_are_not_a_workbook() {
        let err = read_workbook(b"definitely not a spreadsheet".to_vec()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn summary_counts_each_outcome() {
        let row = ImportRow {
            name: "A".into(),
            email: "a@b.co".into(),
            ..ImportRow::default()
        };
        let mut summary = ImportSummary::new(3);
        summary.record_inserted();
        summary.record_existing(&row);
        summary.record_failure(&row, &Error::Validation("bad phone".into()));
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.already_users[0].status, "Already Exists");
        assert_eq!(summary.failed_users[0].error, "bad phone");
    }
}
