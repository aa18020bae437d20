use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use raas_core::Period;
use raas_ledger::PeriodReading;

use super::IngestError;

/// Readings grouped by meter code, each group sorted by period.
///
/// Sorting does not deduplicate: a period listed twice for one meter is left
/// in place for the ledger's sequencing check to reject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingSet {
    by_meter: BTreeMap<String, Vec<PeriodReading>>,
    rows: usize,
}

impl ReadingSet {
    pub fn get(&self, meter_code: &str) -> Option<&[PeriodReading]> {
        self.by_meter.get(meter_code).map(Vec::as_slice)
    }

    pub fn meter_codes(&self) -> impl Iterator<Item = &str> {
        self.by_meter.keys().map(String::as_str)
    }

    /// Data rows read, across all meters.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Latest period present in any meter's readings.
    pub fn last_period(&self) -> Option<Period> {
        self.by_meter
            .values()
            .filter_map(|readings| readings.last().map(|r| r.period))
            .max()
    }
}

#[derive(Debug, Deserialize)]
struct ReadingRow {
    meter_code: String,
    period: String,
    consumption_kwh: f64,
    generation_kwh: Option<f64>,
}

/// Reads `meter_code,period,consumption_kwh,generation_kwh` rows.
///
/// Errors name the 1-based data row. Whether a meter may report generation
/// is checked later against its installation kind.
pub fn read_readings(reader: impl Read) -> Result<ReadingSet, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut set = ReadingSet::default();

    for (idx, result) in rdr.deserialize::<ReadingRow>().enumerate() {
        let row = idx + 1;
        let raw = result.map_err(|source| IngestError::Csv { row, source })?;

        let meter_code = raw.meter_code.trim().to_string();
        if meter_code.is_empty() {
            return Err(IngestError::Row {
                row,
                message: "meter_code is empty".to_string(),
            });
        }
        let period: Period = raw.period.parse().map_err(|e| IngestError::Row {
            row,
            message: format!("{e}"),
        })?;
        let reading = PeriodReading::from_kwh(period, raw.consumption_kwh, raw.generation_kwh)
            .map_err(|e| IngestError::Row {
                row,
                message: format!("{meter_code}: {e}"),
            })?;

        set.by_meter.entry(meter_code).or_default().push(reading);
        set.rows += 1;
    }

    for readings in set.by_meter.values_mut() {
        readings.sort_by_key(|r| r.period);
    }

    Ok(set)
}

pub fn read_readings_file(path: &Path) -> Result<ReadingSet, IngestError> {
    let file = std::fs::File::open(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_readings(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raas_core::Energy;

    const CSV: &str = "\
meter_code,period,consumption_kwh,generation_kwh
GEN-001,02/2024,200,15000
UC-100,02/2024,10000,
GEN-001,01/2024,200,15000
UC-100,01/2024,5000,
";

    #[test]
    fn groups_and_sorts_by_meter() {
        let set = read_readings(CSV.as_bytes()).unwrap();
        assert_eq!(set.row_count(), 4);
        assert_eq!(set.meter_codes().collect::<Vec<_>>(), vec!["GEN-001", "UC-100"]);

        let generator = set.get("GEN-001").unwrap();
        assert_eq!(generator[0].period.to_string(), "01/2024");
        assert_eq!(generator[0].generation, Some(Energy::kwh(15_000)));

        let consumer = set.get("UC-100").unwrap();
        assert_eq!(consumer[1].consumption, Energy::kwh(10_000));
        assert_eq!(consumer[1].generation, None);
        assert_eq!(set.last_period(), Some("02/2024".parse().unwrap()));
    }

    #[test]
    fn negative_consumption_names_the_row() {
        let csv = "meter_code,period,consumption_kwh,generation_kwh\nUC-1,01/2024,1,\nUC-1,02/2024,-5,\n";
        let err = read_readings(csv.as_bytes()).unwrap_err();
        match err {
            IngestError::Row { row, message } => {
                assert_eq!(row, 2);
                assert!(message.starts_with("UC-1: "));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_period_is_rejected() {
        let csv = "meter_code,period,consumption_kwh,generation_kwh\nUC-1,2024-01,1,\n";
        assert!(matches!(
            read_readings(csv.as_bytes()),
            Err(IngestError::Row { row: 1, .. })
        ));
    }

    #[test]
    fn non_numeric_value_is_a_csv_error() {
        let csv = "meter_code,period,consumption_kwh,generation_kwh\nUC-1,01/2024,lots,\n";
        assert!(matches!(
            read_readings(csv.as_bytes()),
            Err(IngestError::Csv { row: 1, .. })
        ));
    }

    #[test]
    fn header_only_file_is_empty() {
        let set = read_readings("meter_code,period,consumption_kwh,generation_kwh\n".as_bytes()).unwrap();
        assert!(set.is_empty());
    }
}
