use crate::types::{GeometryTable, IndicatorRecord, IndicatorTable, JoinedRegion};
use std::collections::{HashMap, HashSet};

pub fn filter_by_year(table: &IndicatorTable, year: i32) -> Vec<&IndicatorRecord> {
    table.rows.iter().filter(|row| row.year == year).collect()
}

/// Year filter followed by an inner join on the geographic code.
pub fn filter_and_join<'a>(
    table: &'a IndicatorTable,
    geometry: &'a GeometryTable,
    year: i32,
) -> Vec<JoinedRegion<'a>> {
    join_rows(filter_by_year(table, year), geometry)
}

/// Inner join of already-filtered rows against a geometry table.
///
/// Output follows geometry order. A code with several rows yields one joined
/// region per row; nothing is deduplicated.
pub fn join_rows<'a>(rows: Vec<&'a IndicatorRecord>, geometry: &'a GeometryTable) -> Vec<JoinedRegion<'a>> {
    let mut by_code: HashMap<&str, Vec<&IndicatorRecord>> = HashMap::new();
    for row in rows {
        by_code.entry(row.code.as_str()).or_default().push(row);
    }

    geometry.records.iter()
        .flat_map(|record| {
            by_code.get(record.code.as_str())
                .into_iter()
                .flatten()
                .map(move |row| JoinedRegion { geometry: record, indicators: *row })
        })
        .collect()
}

/// Reverse lookup of a state's code by display name. First match wins.
pub fn resolve_state_code<'a>(state_geometry: &'a GeometryTable, name: &str) -> Option<&'a str> {
    state_geometry.records.iter()
        .find(|record| record.name == name)
        .map(|record| record.code.as_str())
}

/// Municipality rows whose parent-state code equals the state code's integer
/// value, so `"09"` matches parent code `9`.
pub fn municipalities_of_state<'a>(rows: &[&'a IndicatorRecord], state_code: &str) -> Vec<&'a IndicatorRecord> {
    let Ok(code) = state_code.trim().parse::<u32>() else {
        return Vec::new();
    };
    rows.iter()
        .copied()
        .filter(|row| row.state_code == Some(code))
        .collect()
}

/// Distinct display names in file order.
pub fn state_names(state_geometry: &GeometryTable) -> Vec<&str> {
    let mut seen = HashSet::new();
    state_geometry.records.iter()
        .map(|record| record.name.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

pub fn duplicate_names(state_geometry: &GeometryTable) -> Vec<&str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in &state_geometry.records {
        *counts.entry(record.name.as_str()).or_default() += 1;
    }
    let mut duplicates: Vec<&str> = counts.into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect();
    duplicates.sort_unstable();
    duplicates
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::GeometryRecord;
    use geo::{polygon, MultiPolygon};

    pub fn indicator(code: &str, year: i32, gini: f64, state_code: Option<u32>) -> IndicatorRecord {
        IndicatorRecord {
            code: code.to_string(),
            year,
            gini: Some(gini),
            income: Some(1000.0),
            state_name: state_code.map(|_| "Estado".to_string()),
            state_code,
        }
    }

    pub fn region(code: &str, name: &str) -> GeometryRecord {
        GeometryRecord {
            code: code.to_string(),
            name: name.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
                (x: 0.0, y: 0.0),
            ]]),
        }
    }

    fn states() -> (IndicatorTable, GeometryTable) {
        let table = IndicatorTable {
            rows: vec![
                indicator("09", 2018, 0.45, None),
                indicator("09", 2020, 0.44, None),
                indicator("14", 2018, 0.41, None),
                indicator("99", 2018, 0.50, None),
                indicator("15", 2022, 0.43, None),
            ],
        };
        let geometry = GeometryTable {
            records: vec![
                region("09", "Ciudad de México"),
                region("14", "Jalisco"),
                region("15", "México"),
            ],
        };
        (table, geometry)
    }

    #[test]
    fn year_filter_keeps_only_that_year() {
        let (table, geometry) = states();
        for year in [2018, 2020, 2022] {
            let joined = filter_and_join(&table, &geometry, year);
            assert!(!joined.is_empty());
            assert!(joined.iter().all(|r| r.indicators.year == year));
        }
    }

    #[test]
    fn join_is_inner() {
        let (table, geometry) = states();
        for year in [2018, 2020, 2022] {
            let rows = filter_by_year(&table, year).len();
            let joined = filter_and_join(&table, &geometry, year);
            assert!(joined.len() <= rows.min(geometry.records.len()));
        }

        // "99" has no geometry, "15" has no 2018 row
        let codes: Vec<&str> = filter_and_join(&table, &geometry, 2018).iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["09", "14"]);
    }

    #[test]
    fn year_without_rows_joins_to_empty() {
        let (table, geometry) = states();
        assert!(filter_and_join(&table, &geometry, 1990).is_empty());
    }

    #[test]
    fn duplicate_rows_are_all_retained() {
        let (mut table, geometry) = states();
        table.rows.push(indicator("14", 2018, 0.39, None));

        let joined = filter_and_join(&table, &geometry, 2018);
        assert_eq!(joined.iter().filter(|r| r.code() == "14").count(), 2);
    }

    #[test]
    fn codes_must_match_formatting() {
        let (mut table, geometry) = states();
        table.rows.push(indicator("9", 2022, 0.40, None));

        let codes: Vec<&str> = filter_and_join(&table, &geometry, 2022).iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["15"]);
    }

    #[test]
    fn state_name_resolves_to_code() {
        let (_, geometry) = states();
        assert_eq!(resolve_state_code(&geometry, "Jalisco"), Some("14"));
        assert_eq!(resolve_state_code(&geometry, "Atlantis"), None);
    }

    #[test]
    fn state_names_are_unique() {
        let (_, geometry) = states();
        assert!(duplicate_names(&geometry).is_empty());
        assert_eq!(state_names(&geometry).len(), geometry.records.len());
    }

    #[test]
    fn duplicate_names_are_reported() {
        let (_, mut geometry) = states();
        geometry.records.push(region("32", "Jalisco"));

        assert_eq!(duplicate_names(&geometry), vec!["Jalisco"]);
        assert_eq!(state_names(&geometry), vec!["Ciudad de México", "Jalisco", "México"]);
    }

    #[test]
    fn mexico_city_surfaces_only_its_municipalities() {
        let table = IndicatorTable {
            rows: vec![
                indicator("09002", 2018, 0.39, Some(9)),
                indicator("09003", 2018, 0.47, Some(9)),
                indicator("14039", 2018, 0.40, Some(14)),
                indicator("19039", 2018, 0.42, Some(19)),
            ],
        };
        let rows = filter_by_year(&table, 2018);

        let selected = municipalities_of_state(&rows, "09");
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|r| r.state_code == Some(9)));
    }

    #[test]
    fn unparseable_state_code_selects_nothing() {
        let table = IndicatorTable {
            rows: vec![indicator("09002", 2018, 0.39, Some(9))],
        };
        let rows = filter_by_year(&table, 2018);
        assert!(municipalities_of_state(&rows, "CDMX").is_empty());
    }
}
