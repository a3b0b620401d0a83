use std::path::Path;

use ndarray::Array2;

use crate::error::{PipelineError, Result};

/// Dictionary labels end with GM, WM and CSF ratio columns after at least
/// one identifying column.
pub const MIN_LABEL_COLUMNS: usize = 4;
const RATIO_COLUMNS: usize = 3;

/// Prefix applied to the first original column of relabeled tables.
pub const SOURCE_PREFIX: &str = "Difumo_";

// ---------------------------------------------------------------------------
// LabelTable – header + string rows
// ---------------------------------------------------------------------------

/// A delimited table kept as text so values pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LabelTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a header column.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// All values of the named column, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read the comma-separated dictionary labels shipped with an atlas.
pub fn read_dictionary_labels(path: &Path) -> Result<LabelTable> {
    let table = read_delimited(path, b',', "label CSV")?;
    if table.header.len() < MIN_LABEL_COLUMNS {
        return Err(PipelineError::format(
            "label CSV",
            path,
            format!(
                "{} columns, need at least {MIN_LABEL_COLUMNS} ending in GM, WM, CSF",
                table.header.len()
            ),
        ));
    }
    Ok(table)
}

/// Read a tab-separated label table written by [`write_label_tsv`].
pub fn read_label_tsv(path: &Path) -> Result<LabelTable> {
    read_delimited(path, b'\t', "label TSV")
}

fn read_delimited(path: &Path, delimiter: u8, kind: &'static str) -> Result<LabelTable> {
    // Open separately so a missing file keeps its NotFound kind.
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(file);

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::format(kind, path, e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if header.is_empty() {
        return Err(PipelineError::format(kind, path, "empty header"));
    }

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| PipelineError::format(kind, path, format!("row {row_no}: {e}")))?;
        rows.push(record.iter().map(|v| v.to_string()).collect());
    }
    Ok(LabelTable { header, rows })
}

// ---------------------------------------------------------------------------
// Relabeling
// ---------------------------------------------------------------------------

/// One output row per extracted region.
///
/// Row `m` is the label row of component `regions_idx[m]`, prefixed with the
/// 1-based region number and with its last three fields replaced by row `m`
/// of `ratios` (GM, WM, CSF).
pub fn relabel(
    labels: &LabelTable,
    regions_idx: &[usize],
    ratios: &Array2<f64>,
    source: &Path,
) -> Result<LabelTable> {
    if ratios.dim() != (regions_idx.len(), RATIO_COLUMNS) {
        return Err(PipelineError::Shape(format!(
            "ratio matrix is {:?}, expected ({}, {RATIO_COLUMNS})",
            ratios.dim(),
            regions_idx.len()
        )));
    }

    let mut header = Vec::with_capacity(labels.header.len() + 1);
    header.push("Region".to_string());
    for (i, h) in labels.header.iter().enumerate() {
        if i == 0 {
            header.push(format!("{SOURCE_PREFIX}{h}"));
        } else {
            header.push(h.clone());
        }
    }

    let mut rows = Vec::with_capacity(regions_idx.len());
    for (m, &component) in regions_idx.iter().enumerate() {
        let original = labels.rows.get(component).ok_or_else(|| {
            PipelineError::format(
                "label CSV",
                source,
                format!(
                    "region {} comes from component {component} but only {} label rows exist",
                    m + 1,
                    labels.len()
                ),
            )
        })?;
        let mut row = Vec::with_capacity(original.len() + 1);
        row.push((m + 1).to_string());
        row.extend(original.iter().cloned());
        let first_ratio = row.len() - RATIO_COLUMNS;
        for (j, cell) in row[first_ratio..].iter_mut().enumerate() {
            *cell = format_ratio(ratios[[m, j]]);
        }
        rows.push(row);
    }
    Ok(LabelTable { header, rows })
}

/// Shortest round-trip decimal, always showing a fractional part.
pub fn format_ratio(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains(['.', 'e']) {
        format!("{s}.0")
    } else {
        s
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Render a table as TSV bytes, lines joined by `\n` with no trailing newline.
pub fn to_tsv(table: &LabelTable) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let as_csv_error = |e: csv::Error| PipelineError::Shape(format!("encoding TSV: {e}"));
    writer.write_record(&table.header).map_err(as_csv_error)?;
    for row in &table.rows {
        writer.write_record(row).map_err(as_csv_error)?;
    }
    let mut bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Shape(format!("encoding TSV: {}", e.error())))?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    Ok(bytes)
}

/// Write a table as TSV in one shot: nothing is created if rendering fails.
pub fn write_label_tsv(table: &LabelTable, path: &Path) -> Result<()> {
    let bytes = to_tsv(table)?;
    std::fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    const CSV: &str = "Component,Difumo_names,Yeo_networks7,Yeo_networks17,GM,WM,CSF\n\
1,Superior frontal sulcus,DefaultB,DefaultB,0.689996,0.185709,0.116884\n\
2,Fusiform gyrus,VisCent,VisCent,0.7,0.2,0.1\n\
3,\"Calcarine cortex, anterior\",VisPeri,VisPeri,0.6,0.3,0.1\n";

    fn write_csv(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("labels_64_dictionary.csv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn relabel_prefixes_indices_and_replaces_ratios() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), CSV);
        let labels = read_dictionary_labels(&path).unwrap();
        assert_eq!(labels.len(), 3);

        let regions_idx = [0, 2, 2, 1];
        let ratios = arr2(&[
            [10.5, 2.0, 0.25],
            [1.0, 0.0, 3.0],
            [7.125, 8.0, 9.0],
            [0.1, 0.2, 0.3],
        ]);
        let out = relabel(&labels, &regions_idx, &ratios, &path).unwrap();

        assert_eq!(
            out.header,
            vec![
                "Region",
                "Difumo_Component",
                "Difumo_names",
                "Yeo_networks7",
                "Yeo_networks17",
                "GM",
                "WM",
                "CSF"
            ]
        );
        assert_eq!(out.len(), regions_idx.len());
        for (m, row) in out.rows.iter().enumerate() {
            assert_eq!(row[0], (m + 1).to_string());
            let tail: Vec<f64> = row[5..].iter().map(|v| v.parse().unwrap()).collect();
            assert_eq!(tail, ratios.row(m).to_vec());
        }
        assert_eq!(out.rows[1][2], "Calcarine cortex, anterior");
        assert_eq!(out.rows[3][1], "2");
        assert_eq!(out.rows[1][5..], ["1.0", "0.0", "3.0"]);
    }

    #[test]
    fn tsv_header_and_rows_are_tab_joined() {
        let table = LabelTable {
            header: vec!["Region".into(), "Difumo_Component".into()],
            rows: vec![vec!["1".into(), "7".into()]],
        };
        let text = String::from_utf8(to_tsv(&table).unwrap()).unwrap();
        assert_eq!(text, "Region\tDifumo_Component\n1\t7");

        let header_only = LabelTable {
            header: table.header.clone(),
            rows: Vec::new(),
        };
        let text = String::from_utf8(to_tsv(&header_only).unwrap()).unwrap();
        assert_eq!(text, "Region\tDifumo_Component");
    }

    #[test]
    fn tsv_reads_back_names() {
        let dir = tempfile::tempdir().unwrap();
        let labels = read_dictionary_labels(&write_csv(dir.path(), CSV)).unwrap();
        let ratios = Array2::zeros((2, 3));
        let out = relabel(&labels, &[1, 2], &ratios, dir.path()).unwrap();
        let tsv = dir.path().join("out.tsv");
        write_label_tsv(&out, &tsv).unwrap();

        let back = read_label_tsv(&tsv).unwrap();
        assert_eq!(back, out);
        assert_eq!(
            back.column_values("Difumo_names").unwrap(),
            vec!["Fusiform gyrus", "Calcarine cortex, anterior"]
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_dictionary_labels(&dir.path().join("nope.csv")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn narrow_or_ragged_tables_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let narrow = write_csv(dir.path(), "GM,WM,CSF\n0.1,0.2,0.3\n");
        assert!(matches!(
            read_dictionary_labels(&narrow),
            Err(PipelineError::Format { .. })
        ));

        let ragged = write_csv(dir.path(), "A,GM,WM,CSF\n1,0.1,0.2\n");
        assert!(matches!(
            read_dictionary_labels(&ragged),
            Err(PipelineError::Format { .. })
        ));
    }

    #[test]
    fn region_past_last_component_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), CSV);
        let labels = read_dictionary_labels(&path).unwrap();
        let err = relabel(&labels, &[3], &Array2::zeros((1, 3)), &path).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));

        let err = relabel(&labels, &[0], &Array2::zeros((2, 3)), &path).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }

    #[test]
    fn ratios_keep_a_fractional_part() {
        assert_eq!(format_ratio(0.0), "0.0");
        assert_eq!(format_ratio(12.0), "12.0");
        assert_eq!(format_ratio(0.125), "0.125");
    }
}
