//! Type translation between store fields and arrow columns.

use arrow_schema::{DataType, TimeUnit};

use super::NativeType;
use crate::error::{ConvertError, Result};

/// Columnar type used to export a store field.
///
/// Anything without a dedicated column type (identifiers, rasters, unknown
/// store types) is written as a string.
pub fn map_to_columnar(native: NativeType) -> DataType {
    match native {
        NativeType::ObjectId => DataType::Int64,
        NativeType::Date => DataType::Timestamp(TimeUnit::Second, None),
        NativeType::Double => DataType::Float64,
        NativeType::Integer => DataType::Int64,
        NativeType::BigInteger => DataType::Int64,
        NativeType::Single => DataType::Float32,
        NativeType::SmallInteger => DataType::Int16,
        NativeType::Blob => DataType::LargeBinary,
        NativeType::String => DataType::Utf8,
        _ => DataType::Utf8,
    }
}

/// Store type used to import a column.
///
/// Nested columns are imported as text; their values are flattened to
/// strings on the way in.
pub fn map_to_native(data_type: &DataType) -> Result<NativeType> {
    let native = match data_type {
        DataType::Int8 | DataType::Int16 | DataType::UInt8 | DataType::Boolean => {
            NativeType::SmallInteger
        }
        DataType::Int32
        | DataType::Int64
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => NativeType::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => NativeType::Double,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => NativeType::String,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => NativeType::Date,
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => NativeType::Blob,
        DataType::Dictionary(_, value_type) => map_to_native(value_type)?,
        data_type if data_type.is_nested() => NativeType::String,
        other => return Err(ConvertError::UnsupportedType(other.to_string())),
    };
    Ok(native)
}
