//! Fully-qualified warehouse table identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::ExtractError;

/// A `project.dataset.table` identifier, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Backtick-quoted form for standard SQL, e.g. `` `p.d.t` ``.
    pub fn quoted(&self) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().trim_matches('`').split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(ExtractError::InvalidTableRef(format!(
                "expected 'project.dataset.table', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_ref() {
        let t: TableRef = "landnerds.1_data_lake.all_prop_point_of_interest"
            .parse()
            .unwrap();
        assert_eq!(t.project, "landnerds");
        assert_eq!(t.dataset, "1_data_lake");
        assert_eq!(t.table, "all_prop_point_of_interest");
        assert_eq!(
            t.quoted(),
            "`landnerds.1_data_lake.all_prop_point_of_interest`"
        );
    }

    #[test]
    fn test_parse_table_ref_strips_backticks() {
        let t: TableRef = "`p.d.t`".parse().unwrap();
        assert_eq!(t, TableRef::new("p", "d", "t"));
        assert_eq!(t.to_string(), "p.d.t");
    }

    #[test]
    fn test_parse_table_ref_rejects_wrong_arity() {
        assert!("dataset.table".parse::<TableRef>().is_err());
        assert!("a.b.c.d".parse::<TableRef>().is_err());
        assert!("a..c".parse::<TableRef>().is_err());
        assert!("".parse::<TableRef>().is_err());
    }
}
