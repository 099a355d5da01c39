//! Delimited-text artifacts exchanged between stages and with the bulk loader.
//!
//! Every artifact uses `;` as field delimiter, UTF-8, and locale-formatted
//! amounts, so each stage reads its predecessor's output without conversion.

use crate::constants::{
    AGGREGATE_COLUMNS, FIELD_DELIMITER, JOINED_COLUMNS, LEDGER_COLUMNS,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::amount::{format_amount, parse_amount_or_zero};
use crate::pipeline::processing::schema::{field, require_columns, RegistrySchema};
use crate::pipeline::summary::StageSummary;
use crate::types::{
    non_blank, AggregateRecord, ExpenseRecord, JoinedRecord, OperatorRegistryEntry, Quarter,
};
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn open_writer(path: &Path) -> Result<Writer<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(WriterBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .from_path(path)?)
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    if !path.exists() {
        return Err(PipelineError::NotFound(format!("{} does not exist", path.display())));
    }
    Ok(ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .flexible(true)
        .from_path(path)?)
}

fn year_field(year: Option<i32>) -> String {
    year.map(|y| y.to_string()).unwrap_or_default()
}

fn optional_amount(value: &Option<Decimal>) -> String {
    value.as_ref().map(format_amount).unwrap_or_default()
}

fn expense_fields(record: &ExpenseRecord) -> [String; 5] {
    [
        record.registry_id.clone(),
        record.account_code.clone(),
        year_field(record.year),
        record.quarter.to_string(),
        format_amount(&record.expense_value),
    ]
}

fn parse_expense(row: &StringRecord, idx: &[usize], line: u64) -> Result<ExpenseRecord> {
    let year = field(row, Some(idx[2]));
    let year = if year.is_empty() {
        None
    } else {
        Some(year.parse().map_err(|_| {
            PipelineError::Parse(format!("line {}: invalid year '{}'", line, year))
        })?)
    };
    let expense_value = parse_amount_or_zero(field(row, Some(idx[4])))
        .map_err(|e| PipelineError::Parse(format!("line {}: {}", line, e)))?;
    Ok(ExpenseRecord {
        registry_id: field(row, Some(idx[0])).to_string(),
        account_code: field(row, Some(idx[1])).to_string(),
        year,
        quarter: Quarter::parse_field(field(row, Some(idx[3]))),
        expense_value,
    })
}

/// Writes the consolidated ledger (`REG_ANS;CD_CONTA_CONTABIL;ANO;TRIMESTRE;VALOR_DESPESAS`).
pub fn write_ledger(path: &Path, records: &[ExpenseRecord]) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer.write_record(LEDGER_COLUMNS)?;
    for record in records {
        writer.write_record(expense_fields(record))?;
    }
    writer.flush()?;
    info!("Wrote {} ledger rows to {}", records.len(), path.display());
    Ok(())
}

/// Reads the rows of a persisted ledger through `parse`. A row that does
/// not parse is skipped and counted; a missing column fails the read.
fn read_rows<T>(
    path: &Path,
    columns: &[&str],
    artifact: &str,
    stage: &str,
    parse: impl Fn(&StringRecord, &[usize], u64) -> Result<T>,
) -> Result<(Vec<T>, StageSummary)> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let idx = require_columns(&headers, columns, artifact)?;
    let mut summary = StageSummary::new(stage);

    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let line = i as u64 + 2;
        let parsed = row
            .map_err(PipelineError::from)
            .and_then(|row| parse(&row, &idx, line));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping {} row {}: {}", artifact, line, e);
                summary.record_skip(e.kind());
            }
        }
    }
    summary.record_processed(records.len());
    summary.log();
    Ok((records, summary))
}

pub fn read_ledger(path: &Path) -> Result<(Vec<ExpenseRecord>, StageSummary)> {
    read_rows(
        path,
        &LEDGER_COLUMNS,
        "consolidated ledger",
        "read_ledger",
        parse_expense,
    )
}

/// Writes the left-joined ledger; unmatched rows leave enrichment columns empty.
pub fn write_joined(path: &Path, records: &[JoinedRecord]) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer.write_record(JOINED_COLUMNS)?;
    for record in records {
        let [reg, account, year, quarter, value] = expense_fields(&record.expense);
        writer.write_record([
            reg,
            account,
            year,
            quarter,
            value,
            record.tax_id.clone().unwrap_or_default(),
            record.legal_name.clone().unwrap_or_default(),
            record.business_type.clone().unwrap_or_default(),
            record.state_code.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    info!("Wrote {} joined rows to {}", records.len(), path.display());
    Ok(())
}

/// Reads a joined ledger back into the shape the join produced: blank
/// enrichment columns are `None`.
pub fn read_joined(path: &Path) -> Result<(Vec<JoinedRecord>, StageSummary)> {
    read_rows(
        path,
        &JOINED_COLUMNS,
        "joined ledger",
        "read_joined",
        |row, idx, line| {
            Ok(JoinedRecord {
                expense: parse_expense(row, idx, line)?,
                tax_id: non_blank(field(row, Some(idx[5]))),
                legal_name: non_blank(field(row, Some(idx[6]))),
                business_type: non_blank(field(row, Some(idx[7]))),
                state_code: non_blank(field(row, Some(idx[8]))),
            })
        },
    )
}

/// Writes the aggregate table; undefined statistics are empty fields.
pub fn write_aggregates(path: &Path, records: &[AggregateRecord]) -> Result<()> {
    let mut writer = open_writer(path)?;
    writer.write_record(AGGREGATE_COLUMNS)?;
    for record in records {
        writer.write_record([
            record.legal_name.clone(),
            record.state_code.clone(),
            format_amount(&record.total_expenses),
            optional_amount(&record.quarterly_mean),
            optional_amount(&record.std_dev),
            optional_amount(&record.coefficient_of_variation),
        ])?;
    }
    writer.flush()?;
    info!("Wrote {} aggregate rows to {}", records.len(), path.display());
    Ok(())
}

/// Projects the operator registry onto the join columns. Rows without a
/// registry id cannot match anything and are skipped.
pub fn read_registry(path: &Path) -> Result<(Vec<OperatorRegistryEntry>, StageSummary)> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let schema = RegistrySchema::from_headers(&headers)?;
    let mut summary = StageSummary::new("registry");

    let mut entries = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping malformed registry row: {}", e);
                summary.record_skip("malformed_row");
                continue;
            }
        };
        let registry_id = field(&row, Some(schema.registry_id));
        if registry_id.is_empty() {
            summary.record_skip("empty_registry_id");
            continue;
        }
        entries.push(OperatorRegistryEntry {
            registry_id: registry_id.to_string(),
            legal_name: field(&row, Some(schema.legal_name)).to_string(),
            state_code: field(&row, Some(schema.state_code)).to_string(),
            tax_id: field(&row, Some(schema.tax_id)).to_string(),
            business_type: field(&row, Some(schema.business_type)).to_string(),
        });
        summary.record_processed(1);
    }

    info!("Loaded {} registry entries from {}", entries.len(), path.display());
    summary.log();
    Ok((entries, summary))
}

/// Packs a single artifact into a deflated zip at `dest`.
pub fn zip_artifact(src: &Path, dest: &Path) -> Result<()> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::Config(format!("{} has no file name", src.display())))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(File::create(dest)?);
    zip.start_file(
        name,
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    io::copy(&mut File::open(src)?, &mut zip)?;
    zip.finish()?;
    info!("Packed {} into {}", src.display(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::pipeline::processing::{aggregate, RegistryJoiner};
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn expense(id: &str, account: &str, quarter: Quarter, value: Decimal) -> ExpenseRecord {
        ExpenseRecord {
            registry_id: id.to_string(),
            account_code: account.to_string(),
            year: Some(2025),
            quarter,
            expense_value: value,
        }
    }

    #[test]
    fn ledger_uses_locale_amounts_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("consolidado_despesas.csv");
        let mut unknown = expense("", "411", Quarter::Unknown, Decimal::new(-5, 1));
        unknown.year = None;
        let records = vec![expense("123", "411", Quarter::Q1, Decimal::new(123456, 2)), unknown];

        write_ledger(&path, &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "REG_ANS;CD_CONTA_CONTABIL;ANO;TRIMESTRE;VALOR_DESPESAS");
        assert_eq!(lines[1], "123;411;2025;1;1234,56");
        assert_eq!(lines[2], ";411;;;-0,5");

        let (read, summary) = read_ledger(&path).unwrap();
        assert_eq!(read, records);
        assert!(summary.skip_reasons.is_empty());
    }

    #[test]
    fn ledger_row_with_bad_amount_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consolidado_despesas.csv");
        fs::write(
            &path,
            "REG_ANS;CD_CONTA_CONTABIL;ANO;TRIMESTRE;VALOR_DESPESAS\n\
             1;411;2025;1;10,00\n\
             2;411;2025;1;dez reais\n\
             3;411;20x5;1;5,00\n\
             4;411;2025;2;7,50\n",
        )
        .unwrap();

        let (records, summary) = read_ledger(&path).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.registry_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(summary.skip_reasons["parse_error"], 2);
    }

    #[test]
    fn ledger_without_required_column_is_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        fs::write(&path, "REG_ANS;ANO\n1;2025\n").unwrap();
        assert!(matches!(read_ledger(&path), Err(PipelineError::Schema(_))));
        assert!(matches!(
            read_ledger(&dir.path().join("absent.csv")),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn joined_keeps_unmatched_rows_with_empty_enrichment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("joined.csv");
        let entry = OperatorRegistryEntry {
            registry_id: "1".to_string(),
            legal_name: "Operadora; Saúde".to_string(),
            state_code: "RJ".to_string(),
            tax_id: "123".to_string(),
            business_type: "Autogestão".to_string(),
        };
        let records = vec![
            JoinedRecord::enriched(expense("1", "411", Quarter::Q2, Decimal::new(10, 0)), &entry),
            JoinedRecord::unmatched(expense("2", "411", Quarter::Q2, Decimal::new(20, 0))),
        ];

        write_joined(&path, &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(2).unwrap().ends_with(";20;;;;"));
        let (read, _) = read_joined(&path).unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn saved_join_aggregates_like_the_in_memory_join() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("despesas_com_operadora.csv");
        let registry = vec![
            OperatorRegistryEntry {
                registry_id: "1".to_string(),
                legal_name: "Operadora A".to_string(),
                state_code: "SP".to_string(),
                tax_id: "111".to_string(),
                business_type: "Medicina de Grupo".to_string(),
            },
            OperatorRegistryEntry {
                registry_id: "2".to_string(),
                legal_name: "Operadora Sem UF".to_string(),
                state_code: " ".to_string(),
                tax_id: String::new(),
                business_type: "Autogestão".to_string(),
            },
        ];
        let ledger = vec![
            expense("1", "411", Quarter::Q1, Decimal::new(100, 0)),
            expense("2", "411", Quarter::Q1, Decimal::new(40, 0)),
            expense("3", "411", Quarter::Q1, Decimal::new(7, 0)),
        ];

        let joined = RegistryJoiner::new(DuplicatePolicy::Warn).join(ledger, &registry).records;
        assert_eq!(joined[1].state_code, None);
        assert_eq!(joined[1].tax_id, None);
        write_joined(&path, &joined).unwrap();
        let (saved, summary) = read_joined(&path).unwrap();
        assert_eq!(saved, joined);
        assert!(summary.skip_reasons.is_empty());

        let in_memory = aggregate(&joined).unwrap();
        let from_disk = aggregate(&saved).unwrap();
        assert_eq!(in_memory.records, from_disk.records);
        assert_eq!(from_disk.records.len(), 1);
        assert_eq!(from_disk.summary.skip_reasons["unmatched_registry_id"], 2);
    }

    #[test]
    fn aggregates_leave_undefined_statistics_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("despesas_agregadas.csv");
        let records = vec![AggregateRecord {
            legal_name: "Operadora A".to_string(),
            state_code: "SP".to_string(),
            total_expenses: Decimal::new(150050, 2),
            quarterly_mean: Some(Decimal::new(150050, 2)),
            std_dev: None,
            coefficient_of_variation: None,
        }];

        write_aggregates(&path, &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Razao_Social;UF;TOTAL_DESPESAS;MEDIA_TRIMESTRAL;DESVIO_PADRAO;COEFICIENTE_VARIACAO"
        );
        assert_eq!(lines[1], "Operadora A;SP;1500,5;1500,5;;");
    }

    #[test]
    fn registry_projection_skips_rows_without_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Relatorio_cadop.csv");
        fs::write(
            &path,
            "REGISTRO_OPERADORA;CNPJ;Razao_Social;Nome_Fantasia;Modalidade;UF\n\
             123;111;Operadora A;A;Medicina de Grupo;SP\n\
             ;222;Sem Registro;B;Cooperativa Médica;MG\n\
             456;333;Operadora C;C;Odontologia de Grupo;RS\n",
        )
        .unwrap();

        let (entries, summary) = read_registry(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].registry_id, "456");
        assert_eq!(entries[1].business_type, "Odontologia de Grupo");
        assert_eq!(summary.skip_reasons["empty_registry_id"], 1);
    }

    #[test]
    fn zipped_artifact_contains_the_ledger() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("consolidado_despesas.csv");
        fs::write(&src, "REG_ANS;CD_CONTA_CONTABIL;ANO;TRIMESTRE;VALOR_DESPESAS\n").unwrap();
        let dest = dir.path().join("consolidado_despesas.zip");

        zip_artifact(&src, &dest).unwrap();

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut member = archive.by_name("consolidado_despesas.csv").unwrap();
        let mut content = String::new();
        member.read_to_string(&mut content).unwrap();
        assert!(content.starts_with("REG_ANS;"));
    }
}
