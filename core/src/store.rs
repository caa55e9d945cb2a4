use crate::RankError;

/// One CSV row. Field values are stored positionally, aligned with the
/// schema of the [`ItemStore`] that owns the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    values: Vec<String>,
}

impl Record {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// The original collection of items to rank, immutable once loaded.
///
/// The schema is the ordered column list taken from the CSV header row;
/// every record holds exactly one value per column.
#[derive(Debug, Clone)]
pub struct ItemStore {
    schema: Vec<String>,
    items: Vec<Record>,
}

impl ItemStore {
    pub fn new(schema: Vec<String>, items: Vec<Record>) -> Result<Self, RankError> {
        for (i, record) in items.iter().enumerate() {
            if record.values().len() != schema.len() {
                return Err(RankError::Format(format!(
                    "row {i} has {} fields, schema has {}",
                    record.values().len(),
                    schema.len()
                )));
            }
        }
        Ok(Self { schema, items })
    }

    /// Parse an uploaded CSV file. The first row defines the schema;
    /// rows whose fields are all empty are skipped.
    pub fn from_csv(data: &[u8]) -> Result<Self, RankError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(data);

        let schema: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut items = Vec::new();
        for result in reader.records() {
            let row = result?;
            if row.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            items.push(Record::new(row.iter().map(|f| f.to_string()).collect()));
        }

        tracing::debug!("parsed {} items with {} columns", items.len(), schema.len());

        Self::new(schema, items)
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> &Record {
        &self.items[index]
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    /// Write the records selected by `order` as a CSV document with the
    /// original columns. Used for the final results download.
    pub fn to_csv(&self, order: &[usize]) -> Result<String, RankError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.schema)?;
        for &index in order {
            writer.write_record(self.items[index].values())?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| RankError::Format(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| RankError::Format(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_csv_first_row_is_schema() {
        let store = ItemStore::from_csv(b"name,year\nAlien,1979\nHeat,1995\n").unwrap();
        assert_eq!(store.schema(), &["name", "year"]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).values(), &["Heat", "1995"]);
    }

    #[test]
    fn test_from_csv_skips_blank_rows() {
        let store = ItemStore::from_csv(b"name,year\nAlien,1979\n,\nHeat,1995\n").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_from_csv_empty_body() {
        let store = ItemStore::from_csv(b"name,year\n").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.schema(), &["name", "year"]);
    }

    #[test]
    fn test_from_csv_ragged_row_is_an_error() {
        assert!(ItemStore::from_csv(b"name,year\nAlien\n").is_err());
    }

    #[test]
    fn test_to_csv_follows_order() {
        let store = ItemStore::from_csv(b"name\nA\nB\nC\n").unwrap();
        let csv = store.to_csv(&[2, 0, 1]).unwrap();
        assert_eq!(csv, "name\nC\nA\nB\n");
    }
}
