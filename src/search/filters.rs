//! OData filter rendering for the search service.

use super::types::SearchFilters;

/// Render filter constraints as an OData `$filter` expression, or `None` when unconstrained.
pub fn build_odata_filter(filters: &SearchFilters) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(year) = filters.year {
        clauses.push(format!("year eq {year}"));
    }
    if let Some(month) = filters.month {
        clauses.push(format!("month eq {month}"));
    }
    if let Some(document_id) = filters.document_id() {
        clauses.push(format!("document_id eq '{}'", escape_literal(document_id)));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" and "))
    }
}

/// OData string literals escape a single quote by doubling it.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_year_and_month() {
        let filters = SearchFilters {
            year: Some(1923),
            month: Some(4),
            document_id: None,
        };
        assert_eq!(
            build_odata_filter(&filters).as_deref(),
            Some("year eq 1923 and month eq 4")
        );
    }

    #[test]
    fn escapes_document_id_quotes() {
        let filters = SearchFilters {
            document_id: Some("o'brien-1901".into()),
            ..Default::default()
        };
        assert_eq!(
            build_odata_filter(&filters).as_deref(),
            Some("document_id eq 'o''brien-1901'")
        );
    }

    #[test]
    fn empty_filters_render_nothing() {
        assert!(build_odata_filter(&SearchFilters::default()).is_none());
        let blank = SearchFilters {
            document_id: Some("   ".into()),
            ..Default::default()
        };
        assert!(build_odata_filter(&blank).is_none());
    }
}
