// ==========================================
// 树木导入系统 - 行提交器
// ==========================================
// 职责: VALID 行 → 目标记录（树种 / 样地 + 树木）
// 说明:
// - 在调用方提供的事务内执行，不自行提交
// - 按目标身份键 upsert，分块重放不会重复创建
// - 返回目标记录 ID，写回 import_row.target_id
// ==========================================

use crate::domain::{FieldValue, ImportRow, ImportType, Plot, Species, Tree};
use crate::importer::fields::{species_fields, tree_fields};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::TargetRepository;
use rusqlite::Connection;

// ==========================================
// RowCommitter Trait
// ==========================================
pub trait RowCommitter: Send + Sync {
    /// 提交一行，返回目标记录 ID
    fn commit_row(&self, conn: &Connection, row: &ImportRow) -> RepositoryResult<i64>;
}

/// 导入类型 → 行提交器
pub fn committer_for(import_type: ImportType) -> &'static dyn RowCommitter {
    match import_type {
        ImportType::Species => &SpeciesRowCommitter,
        ImportType::Tree => &TreeRowCommitter,
    }
}

fn text_or_empty(row: &ImportRow, field: &str) -> String {
    row.cleaned_text(field).unwrap_or_default()
}

// ==========================================
// SpeciesRowCommitter
// ==========================================
pub struct SpeciesRowCommitter;

impl SpeciesRowCommitter {
    fn build_species(row: &ImportRow) -> RepositoryResult<Species> {
        let genus = row
            .cleaned_text(species_fields::GENUS)
            .ok_or_else(|| RepositoryError::FieldValueError {
                field: species_fields::GENUS.to_string(),
                message: format!("行 {} 缺少校验后的 genus", row.idx),
            })?;

        Ok(Species {
            id: 0,
            genus,
            species: text_or_empty(row, species_fields::SPECIES),
            cultivar: text_or_empty(row, species_fields::CULTIVAR),
            other_part_of_name: text_or_empty(row, species_fields::OTHER_PART_OF_NAME),
            common_name: row.cleaned_text(species_fields::COMMON_NAME),
            is_native: row.cleaned_bool(species_fields::IS_NATIVE),
            gender: row.cleaned_text(species_fields::GENDER),
            flowering_period: row.cleaned_text(species_fields::FLOWERING_PERIOD),
            fruit_or_nut_period: row.cleaned_text(species_fields::FRUIT_OR_NUT_PERIOD),
            fall_conspicuous: row.cleaned_bool(species_fields::FALL_CONSPICUOUS),
            flower_conspicuous: row.cleaned_bool(species_fields::FLOWER_CONSPICUOUS),
            palatable_human: row.cleaned_bool(species_fields::PALATABLE_HUMAN),
            has_wildlife_value: row.cleaned_bool(species_fields::HAS_WILDLIFE_VALUE),
            fact_sheet_url: row.cleaned_text(species_fields::FACT_SHEET_URL),
            plant_guide_url: row.cleaned_text(species_fields::PLANT_GUIDE_URL),
            itree_code: row.cleaned_text(species_fields::ITREE_CODE),
            max_diameter: row.cleaned_f64(species_fields::MAX_DIAMETER),
            max_height: row.cleaned_f64(species_fields::MAX_HEIGHT),
        })
    }
}

impl RowCommitter for SpeciesRowCommitter {
    fn commit_row(&self, conn: &Connection, row: &ImportRow) -> RepositoryResult<i64> {
        let species = Self::build_species(row)?;
        TargetRepository::upsert_species_tx(conn, &species)
    }
}

// ==========================================
// TreeRowCommitter
// ==========================================
// 目标 ID 为样地 ID；树木挂在样地上
pub struct TreeRowCommitter;

impl TreeRowCommitter {
    fn build_plot(row: &ImportRow) -> RepositoryResult<Plot> {
        let (x, y) = match row.cleaned.get(tree_fields::POINT) {
            Some(FieldValue::Point { x, y }) => (*x, *y),
            _ => {
                return Err(RepositoryError::FieldValueError {
                    field: tree_fields::POINT.to_string(),
                    message: format!("行 {} 缺少校验后的坐标", row.idx),
                })
            }
        };

        Ok(Plot {
            id: row
                .cleaned
                .get(tree_fields::OPENTREEMAP_PLOT_ID)
                .and_then(FieldValue::as_i64)
                .unwrap_or(0),
            x,
            y,
            street_address: row.cleaned_text(tree_fields::STREET_ADDRESS),
            city: row.cleaned_text(tree_fields::CITY_ADDRESS),
            postal_code: row.cleaned_text(tree_fields::POSTAL_CODE),
            width: row.cleaned_f64(tree_fields::PLOT_WIDTH),
            length: row.cleaned_f64(tree_fields::PLOT_LENGTH),
            read_only: row.cleaned_bool(tree_fields::READ_ONLY),
            external_id: row.cleaned_text(tree_fields::EXTERNAL_ID_NUMBER),
        })
    }

    /// 构造树木；tree present = false 或无任何树木数据时返回 None
    fn build_tree(row: &ImportRow, plot_id: i64) -> Option<Tree> {
        let tree = Tree {
            id: 0,
            plot_id,
            species_id: row
                .cleaned
                .get(tree_fields::SPECIES_OBJECT)
                .and_then(FieldValue::as_i64),
            diameter: row.cleaned_f64(tree_fields::DIAMETER),
            height: row.cleaned_f64(tree_fields::TREE_HEIGHT),
            canopy_height: row.cleaned_f64(tree_fields::CANOPY_HEIGHT),
            date_planted: row
                .cleaned
                .get(tree_fields::DATE_PLANTED)
                .and_then(FieldValue::as_date),
        };

        match row.cleaned_bool(tree_fields::TREE_PRESENT) {
            Some(false) => None,
            Some(true) => Some(tree),
            None => {
                let has_data = tree.species_id.is_some()
                    || tree.diameter.is_some()
                    || tree.height.is_some()
                    || tree.canopy_height.is_some()
                    || tree.date_planted.is_some();
                has_data.then_some(tree)
            }
        }
    }
}

impl RowCommitter for TreeRowCommitter {
    fn commit_row(&self, conn: &Connection, row: &ImportRow) -> RepositoryResult<i64> {
        let plot = Self::build_plot(row)?;

        let plot_id = if plot.id > 0 {
            TargetRepository::update_plot_tx(conn, &plot)?;
            plot.id
        } else {
            TargetRepository::upsert_plot_for_row_tx(conn, row.event_id, row.idx, &plot)?
        };

        if let Some(tree) = Self::build_tree(row, plot_id) {
            TargetRepository::upsert_tree_tx(conn, &tree)?;
        }

        Ok(plot_id)
    }
}
