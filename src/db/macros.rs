//! Declarative macros.
//!
//! - `impl_db_dispatch!` generates the per-backend match over `SqlxBackend`
//! - `mapped_record!` declares a struct usable as a typed result row and as
//!   a parameter bag
//! - `params!` builds an ad-hoc parameter bag
//!
//! The macros expand at compile time with zero runtime overhead.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `SqlxBackend` variants, reducing the
/// need to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(backend, {
///     MySql(conn) => do_mysql(conn),
///     Postgres(conn) => do_postgres(conn),
///     SQLite(conn) => do_sqlite(conn),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($backend:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $backend {
            $(
                $crate::db::connection::SqlxBackend::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

/// Declare a struct that maps to result rows and binds as a parameter bag.
///
/// Columns are matched against field names exactly (case-sensitive). NULL
/// columns and columns without a field are skipped, leaving the field's
/// `Default`. As a bag, every field becomes a parameter named after it.
///
/// ```
/// dbcontext::mapped_record! {
///     #[derive(Debug, Default, Clone, PartialEq)]
///     pub struct User {
///         pub id: i64,
///         pub name: String,
///         pub email: Option<String>,
///     }
/// }
///
/// use dbcontext::models::{FromRecord, ToParams};
/// assert_eq!(User::COLUMNS, &["id", "name", "email"]);
/// assert_eq!(User::default().to_params().len(), 3);
/// ```
#[macro_export]
macro_rules! mapped_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::models::FromRecord for $name {
            const COLUMNS: &'static [&'static str] = &[$(stringify!($field)),*];

            fn set_column(
                &mut self,
                column: &str,
                value: &$crate::models::Value,
            ) -> $crate::error::DbResult<bool> {
                $(
                    if column == stringify!($field) {
                        self.$field = <$ty as $crate::models::FromValue>::from_value(value)?;
                        return Ok(true);
                    }
                )*
                let _ = value;
                Ok(false)
            }
        }

        impl $crate::models::ToParams for $name {
            fn to_params(&self) -> ::std::vec::Vec<$crate::models::Parameter> {
                ::std::vec![
                    $($crate::models::Parameter::from_field(stringify!($field), &self.$field)),*
                ]
            }
        }
    };
}

/// Build an ad-hoc parameter bag.
///
/// ```
/// let bag = dbcontext::params! { id: 7, name: "alice" };
/// assert_eq!(bag.len(), 2);
/// assert_eq!(bag[0].name, "id");
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::Parameter>::new()
    };
    ($($name:ident : $value:expr),+ $(,)?) => {
        ::std::vec![
            $($crate::models::Parameter::from_field(stringify!($name), &$value)),+
        ]
    };
}

#[cfg(test)]
mod tests {
    use crate::error::DbError;
    use crate::models::{FromRecord, ParamType, Record, ToParams, Value};

    crate::mapped_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Product {
            id: i32,
            name: String,
            price: f64,
            note: Option<String>,
        }
    }

    #[test]
    fn test_mapped_record_columns() {
        assert_eq!(Product::COLUMNS, &["id", "name", "price", "note"]);
    }

    #[test]
    fn test_mapped_record_from_record() {
        let mut record = Record::new();
        record.push("id", Value::Int(3));
        record.push("name", Value::Text("lamp".to_string()));
        record.push("Price", Value::Float(9.5));
        record.push("note", Value::Null);
        record.push("extra", Value::Bool(true));

        let product = Product::from_record(&record).unwrap();
        assert_eq!(
            product,
            Product {
                id: 3,
                name: "lamp".to_string(),
                // Case-sensitive: "Price" is not "price"
                price: 0.0,
                note: None,
            }
        );
    }

    #[test]
    fn test_mapped_record_conversion_error() {
        let mut record = Record::new();
        record.push("id", Value::Text("abc".to_string()));

        let err = Product::from_record(&record).unwrap_err();
        match err {
            DbError::Mapping { column, .. } => assert_eq!(column, "id"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mapped_record_as_params() {
        let product = Product {
            id: 1,
            name: "desk".to_string(),
            price: 120.0,
            note: None,
        };
        let params = product.to_params();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "price", "note"]);
        assert_eq!(params[0].param_type, Some(ParamType::Int32));
        assert_eq!(params[3].value, Value::Null);
        assert_eq!(params[3].param_type, Some(ParamType::String));
    }

    #[test]
    fn test_params_macro() {
        let bag = crate::params! { id: 7i64, name: "alice", active: true };
        assert_eq!(bag.len(), 3);
        assert_eq!(bag[0].param_type, Some(ParamType::Int64));
        assert_eq!(bag[1].value, Value::Text("alice".to_string()));
        assert_eq!(bag[2].value, Value::Bool(true));

        let empty = crate::params! {};
        assert!(empty.is_empty());
    }
}
