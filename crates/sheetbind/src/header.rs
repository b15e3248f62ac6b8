use std::collections::BTreeMap;

use serde::Serialize;
use sheetbind_spec::{ColumnDef, Structure};
use tracing::{debug, info};

use crate::options::ModeFlags;

/// Concrete 1-based column layout of a sheet after mode filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderInfo {
    /// First row below the header block.
    pub second_row_index: u32,
    /// Header label to column index.
    pub column_map: BTreeMap<String, usize>,
    /// Column id to column index.
    pub column_id_map: BTreeMap<String, usize>,
    pub num_columns: usize,
    pub column_formats: BTreeMap<String, String>,
    pub column_colspan: BTreeMap<String, usize>,
}

impl HeaderInfo {
    pub fn index_of(&self, column_id: &str) -> Option<usize> {
        self.column_id_map.get(column_id).copied()
    }

    pub fn format_of(&self, column_id: &str) -> Option<&str> {
        self.column_formats.get(column_id).map(String::as_str)
    }

    /// Column index back to its header label.
    pub fn header_at(&self, index: usize) -> Option<&str> {
        self.column_map
            .iter()
            .find(|(_, idx)| **idx == index)
            .map(|(label, _)| label.as_str())
    }

    /// Column index back to its id. Parents share their index with their
    /// first child; the child wins.
    pub fn column_id_at(&self, index: usize) -> Option<&str> {
        let mut found = None;
        for (id, idx) in &self.column_id_map {
            if *idx == index && self.column_colspan.get(id).copied().unwrap_or(1) == 1 {
                return Some(id.as_str());
            }
            if *idx == index && found.is_none() {
                found = Some(id.as_str());
            }
        }
        found
    }
}

fn is_filtered(column: &ColumnDef, modes: ModeFlags) -> bool {
    (modes.daf && column.skip_in_daf) || (modes.custom && column.skip_in_custom)
}

/// Lay out `structure.columns` left to right from index 1.
///
/// Columns skipped by the active modes take no space. A parent with
/// children sits at the index of its first child and spans all of them; each
/// child takes one index. A leaf takes `colspan` indices.
pub fn resolve_header(structure: &Structure, modes: ModeFlags) -> HeaderInfo {
    let mut info = HeaderInfo {
        second_row_index: structure.header_row + 1,
        ..HeaderInfo::default()
    };
    let mut cursor = 1usize;
    let mut kept = 0usize;

    for column in &structure.columns {
        if is_filtered(column, modes) {
            info!(
                column = column.id.as_deref().unwrap_or("unknown"),
                daf = modes.daf,
                custom = modes.custom,
                "filtering out column"
            );
            continue;
        }
        kept += 1;

        let id = column
            .id
            .clone()
            .unwrap_or_else(|| format!("col_{cursor}"));
        info.column_map.insert(column.header.clone(), cursor);
        info.column_id_map.insert(id.clone(), cursor);

        if column.children.is_empty() {
            let span = column.colspan.max(1) as usize;
            if let Some(format) = &column.format {
                info.column_formats.insert(id.clone(), format.clone());
            }
            info.column_colspan.insert(id, span);
            cursor += span;
            continue;
        }

        info.column_colspan.insert(id, column.children.len());
        for child in &column.children {
            let child_id = child
                .id
                .clone()
                .unwrap_or_else(|| format!("col_{cursor}"));
            info.column_map.insert(child.header.clone(), cursor);
            info.column_id_map.insert(child_id.clone(), cursor);
            if let Some(format) = &child.format {
                info.column_formats.insert(child_id.clone(), format.clone());
            }
            info.column_colspan.insert(child_id, 1);
            cursor += 1;
        }
    }

    info.num_columns = cursor - 1;
    debug!(
        total = structure.columns.len(),
        kept,
        num_columns = info.num_columns,
        "header resolved"
    );
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn structure(columns: Vec<ColumnDef>) -> Structure {
        Structure {
            columns,
            header_row: 1,
        }
    }

    #[test]
    fn static_colspan_pushes_next_column() {
        let info = resolve_header(
            &structure(vec![
                ColumnDef::new("col_static", "Mark & Nº").with_colspan(2),
                ColumnDef::new("col_po", "P.O"),
            ]),
            ModeFlags::STANDARD,
        );
        assert_eq!(info.column_id_map["col_static"], 1);
        assert_eq!(info.column_id_map["col_po"], 3);
        assert_eq!(info.num_columns, 3);
        assert_eq!(info.second_row_index, 2);
    }

    #[test]
    fn parent_spans_children() {
        let info = resolve_header(
            &structure(vec![
                ColumnDef::new("col_po", "P.O"),
                ColumnDef::new("col_qty", "Quantity")
                    .with_colspan(5)
                    .with_children(vec![
                        ColumnDef::new("col_qty_pcs", "PCS").with_format("#,##0"),
                        ColumnDef::new("col_qty_sf", "SF").with_colspan(3),
                    ]),
                ColumnDef::new("col_net", "N.W"),
            ]),
            ModeFlags::STANDARD,
        );
        assert_eq!(info.column_id_map["col_qty"], 2);
        assert_eq!(info.column_colspan["col_qty"], 2);
        assert_eq!(info.column_id_map["col_qty_pcs"], 2);
        assert_eq!(info.column_id_map["col_qty_sf"], 3);
        assert_eq!(info.column_colspan["col_qty_sf"], 1);
        assert_eq!(info.column_id_map["col_net"], 4);
        assert_eq!(info.num_columns, 4);
        assert_eq!(info.format_of("col_qty_pcs"), Some("#,##0"));
        assert_eq!(info.column_id_at(2), Some("col_qty_pcs"));
        assert_eq!(info.header_at(4), Some("N.W"));
    }

    #[test]
    fn skipped_columns_take_no_space() {
        let columns = vec![
            ColumnDef::new("col_po", "P.O"),
            ColumnDef::new("col_net", "N.W").skip_in_daf(),
            ColumnDef::new("col_cbm", "CBM").skip_in_custom(),
            ColumnDef::new("col_gross", "G.W"),
        ];
        let daf = resolve_header(&structure(columns.clone()), ModeFlags::daf());
        assert!(!daf.column_id_map.contains_key("col_net"));
        assert_eq!(daf.column_id_map["col_cbm"], 2);
        assert_eq!(daf.column_id_map["col_gross"], 3);

        let custom = resolve_header(&structure(columns.clone()), ModeFlags::custom());
        assert_eq!(custom.column_id_map["col_net"], 2);
        assert!(!custom.column_id_map.contains_key("col_cbm"));

        let both = resolve_header(&structure(columns), ModeFlags::new(true, true));
        assert_eq!(both.num_columns, 2);
    }

    #[test]
    fn missing_ids_default_to_cursor() {
        let mut unnamed = ColumnDef::new("x", "Remarks");
        unnamed.id = None;
        let info = resolve_header(
            &structure(vec![ColumnDef::new("col_po", "P.O").with_colspan(2), unnamed]),
            ModeFlags::STANDARD,
        );
        assert_eq!(info.column_id_map["col_3"], 3);
    }

    fn arb_leaf() -> impl Strategy<Value = (u32, bool, bool)> {
        (1u32..4, any::<bool>(), any::<bool>())
    }

    proptest! {
        #[test]
        fn leaf_columns_sum_surviving_colspans(
            leaves in prop::collection::vec(arb_leaf(), 0..12),
            daf in any::<bool>(),
            custom in any::<bool>(),
        ) {
            let columns: Vec<ColumnDef> = leaves
                .iter()
                .enumerate()
                .map(|(i, (span, skip_daf, skip_custom))| {
                    let mut col = ColumnDef::new(format!("col_{i}_x"), format!("H{i}")).with_colspan(*span);
                    col.skip_in_daf = *skip_daf;
                    col.skip_in_custom = *skip_custom;
                    col
                })
                .collect();
            let modes = ModeFlags::new(daf, custom);
            let expected: usize = columns
                .iter()
                .filter(|c| !is_filtered(c, modes))
                .map(|c| c.colspan as usize)
                .sum();

            let first = resolve_header(&structure(columns.clone()), modes);
            prop_assert_eq!(first.num_columns, expected);
            for (id, idx) in &first.column_id_map {
                let header = format!("H{}", &id[4..id.len() - 2]);
                prop_assert_eq!(first.column_map.get(&header), Some(idx));
            }
            prop_assert_eq!(first, resolve_header(&structure(columns), modes));
        }
    }
}
