/// Column names and artifact names shared by every stage and by the
/// downstream bulk-load step. Changing any of these breaks consumers.

pub const DEFAULT_INDEX_URL: &str = "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
pub const DEFAULT_REGISTRY_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/Relatorio_cadop.csv";

pub const FIELD_DELIMITER: u8 = b';';

// Quarterly disclosure files
pub const COL_SOURCE_REG_ANS: &str = "REG_ANS";
pub const COL_SOURCE_ACCOUNT: &str = "CD_CONTA_CONTABIL";
pub const COL_OPENING_BALANCE: &str = "VL_SALDO_INICIAL";
pub const COL_CLOSING_BALANCE: &str = "VL_SALDO_FINAL";

// Consolidated ledger artifact
pub const COL_REG_ANS: &str = "REG_ANS";
pub const COL_ACCOUNT: &str = "CD_CONTA_CONTABIL";
pub const COL_YEAR: &str = "ANO";
pub const COL_QUARTER: &str = "TRIMESTRE";
pub const COL_EXPENSES: &str = "VALOR_DESPESAS";

pub const LEDGER_COLUMNS: [&str; 5] = [COL_REG_ANS, COL_ACCOUNT, COL_YEAR, COL_QUARTER, COL_EXPENSES];

// Operator registry
pub const COL_REGISTRY_ID: &str = "REGISTRO_OPERADORA";
pub const COL_TAX_ID: &str = "CNPJ";
pub const COL_LEGAL_NAME: &str = "Razao_Social";
pub const COL_BUSINESS_TYPE: &str = "Modalidade";
pub const COL_STATE: &str = "UF";

pub const JOINED_COLUMNS: [&str; 9] = [
    COL_REG_ANS,
    COL_ACCOUNT,
    COL_YEAR,
    COL_QUARTER,
    COL_EXPENSES,
    COL_TAX_ID,
    COL_LEGAL_NAME,
    COL_BUSINESS_TYPE,
    COL_STATE,
];

// Aggregate artifact
pub const COL_TOTAL: &str = "TOTAL_DESPESAS";
pub const COL_QUARTERLY_MEAN: &str = "MEDIA_TRIMESTRAL";
pub const COL_STD_DEV: &str = "DESVIO_PADRAO";
pub const COL_CV: &str = "COEFICIENTE_VARIACAO";

pub const AGGREGATE_COLUMNS: [&str; 6] = [
    COL_LEGAL_NAME,
    COL_STATE,
    COL_TOTAL,
    COL_QUARTERLY_MEAN,
    COL_STD_DEV,
    COL_CV,
];

// Artifact file names
pub const LEDGER_FILENAME: &str = "consolidado_despesas.csv";
pub const LEDGER_ARCHIVE_FILENAME: &str = "consolidado_despesas.zip";
pub const JOINED_FILENAME: &str = "joined.csv";
pub const AGGREGATE_FILENAME: &str = "despesas_agregadas.csv";
pub const REGISTRY_FILENAME: &str = "Relatorio_cadop.csv";
pub const REPORT_FILENAME: &str = "run_report.json";
