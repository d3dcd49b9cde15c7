use serde::Serialize;

/// Fixed cutoff above which a student qualifies for a certificate.
pub const ELIGIBILITY_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRecord {
    pub name: String,
    pub percentage: f64,
    pub eligible: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub students: Vec<StudentRecord>,
    /// Rows dropped because the percentage column did not parse. The drop
    /// itself is intentional; the count is reported so callers can see it.
    pub skipped_rows: usize,
}

/// Parse a two-column roster (`name,percentage`, header row skipped).
/// Names are unquoted and trimmed. Rows with a missing name or an unparsable
/// percentage are dropped and counted.
pub fn parse_roster(data: &[u8]) -> EligibilityReport {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut students = Vec::new();
    let mut skipped_rows = 0;

    for record in reader.records() {
        let Ok(record) = record else {
            skipped_rows += 1;
            continue;
        };

        let name = record
            .get(0)
            .map(|s| s.trim_matches('"').trim())
            .unwrap_or("");
        let percentage = record.get(1).and_then(|s| s.parse::<f64>().ok());

        match percentage {
            Some(percentage) if !name.is_empty() => students.push(StudentRecord {
                name: name.to_string(),
                percentage,
                eligible: percentage >= ELIGIBILITY_THRESHOLD,
            }),
            _ => skipped_rows += 1,
        }
    }

    EligibilityReport {
        students,
        skipped_rows,
    }
}
