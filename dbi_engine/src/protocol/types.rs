/// Column type codes as reported by the MySQL client protocol.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    Varchar = 15,
    Bit = 16,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

/// How a column value is materialized at fetch time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// The client library's string conversion of the value
    Text,
    /// Raw bytes, no encoding transformation
    Binary,
}

impl ValueKind {
    pub fn is_binary(self) -> bool {
        self == ValueKind::Binary
    }
}

impl FieldType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Decimal,
            1 => Self::Tiny,
            2 => Self::Short,
            3 => Self::Long,
            4 => Self::Float,
            5 => Self::Double,
            6 => Self::Null,
            7 => Self::Timestamp,
            8 => Self::LongLong,
            9 => Self::Int24,
            10 => Self::Date,
            11 => Self::Time,
            12 => Self::DateTime,
            13 => Self::Year,
            15 => Self::Varchar,
            16 => Self::Bit,
            245 => Self::Json,
            246 => Self::NewDecimal,
            247 => Self::Enum,
            248 => Self::Set,
            249 => Self::TinyBlob,
            250 => Self::MediumBlob,
            251 => Self::LongBlob,
            252 => Self::Blob,
            253 => Self::VarString,
            255 => Self::Geometry,
            _ => Self::String,
        }
    }

    /// BLOB-family columns are fetched as raw bytes, everything else is
    /// converted to a string by the client library.
    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::TinyBlob | Self::MediumBlob | Self::LongBlob | Self::Blob => ValueKind::Binary,
            _ => ValueKind::Text,
        }
    }

    pub fn from_data_type(data_type: &odbc_api::DataType) -> Self {
        use odbc_api::DataType;

        match data_type {
            DataType::TinyInt | DataType::Bit => Self::Tiny,
            DataType::SmallInt => Self::Short,
            DataType::Integer => Self::Long,
            DataType::BigInt => Self::LongLong,
            DataType::Numeric { .. } | DataType::Decimal { .. } => Self::NewDecimal,
            DataType::Date => Self::Date,
            DataType::Timestamp { .. } => Self::DateTime,
            DataType::Binary { .. } | DataType::Varbinary { .. } => Self::Blob,
            DataType::LongVarbinary { .. } => Self::LongBlob,
            DataType::Varchar { .. } => Self::VarString,
            _ => Self::String,
        }
    }
}
