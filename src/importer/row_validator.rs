// ==========================================
// 树木导入系统 - 行校验器
// ==========================================
// 职责: (字段目录, 原始行, 引用查询) → (校验后数据, 错误列表)
// 说明:
// - 行与行之间互不依赖，同一输入重复校验结果一致
// - 致命错误 ⇒ 行状态 ERROR；仅有警告 ⇒ VALID
// - 引用查询失败属于存储故障，向上返回 Err，由分块单元重试
// ==========================================

use crate::domain::{
    CleanedRowData, ErrorCode, FieldValue, ImportType, RawRowData, RowError, RowStatus,
    SpeciesMatch,
};
use crate::importer::field_validator::validate_field;
use crate::importer::fields::{species_fields, tree_fields, FieldCatalog};
use crate::repository::error::RepositoryResult;
use crate::repository::TargetRepository;
use serde_json::json;

// ==========================================
// ReferenceLookup - 校验期间的只读引用查询
// ==========================================
pub trait ReferenceLookup {
    /// 按名称四元组（genus, species, cultivar, other part of name）匹配树种
    fn species_by_name_parts(&self, parts: &[&str; 4]) -> RepositoryResult<Vec<SpeciesMatch>>;

    /// 样地是否存在
    fn plot_exists(&self, plot_id: i64) -> RepositoryResult<bool>;
}

impl ReferenceLookup for TargetRepository {
    fn species_by_name_parts(&self, parts: &[&str; 4]) -> RepositoryResult<Vec<SpeciesMatch>> {
        self.find_species_by_name_parts(parts[0], parts[1], parts[2], parts[3])
    }

    fn plot_exists(&self, plot_id: i64) -> RepositoryResult<bool> {
        TargetRepository::plot_exists(self, plot_id)
    }
}

// ==========================================
// RowValidation - 单行校验结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValidation {
    pub cleaned: CleanedRowData,
    pub errors: Vec<RowError>,
}

impl RowValidation {
    pub fn status(&self) -> RowStatus {
        if self.errors.iter().any(|e| e.fatal) {
            RowStatus::Error
        } else {
            RowStatus::Valid
        }
    }

    fn push(&mut self, error: RowError) {
        self.errors.push(error);
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.cleaned.get(field).and_then(FieldValue::as_text)
    }

    fn float(&self, field: &str) -> Option<f64> {
        self.cleaned.get(field).and_then(FieldValue::as_f64)
    }

    fn has_error_on(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.fields.iter().any(|f| f == field))
    }
}

// ==========================================
// RowValidator Trait
// ==========================================
pub trait RowValidator: Send + Sync {
    fn catalog(&self) -> &'static FieldCatalog;

    /// 校验一行
    fn validate(
        &self,
        data: &RawRowData,
        lookup: &dyn ReferenceLookup,
        date_format: &str,
    ) -> RepositoryResult<RowValidation>;
}

/// 导入类型 → 行校验器
pub fn validator_for(import_type: ImportType) -> &'static dyn RowValidator {
    match import_type {
        ImportType::Species => &SpeciesRowValidator,
        ImportType::Tree => &TreeRowValidator,
    }
}

/// 逐字段类型校验（目录中所有输入字段）
fn validate_catalog_fields(
    catalog: &FieldCatalog,
    data: &RawRowData,
    date_format: &str,
) -> RowValidation {
    let mut result = RowValidation::default();
    for descriptor in catalog.input_fields() {
        let raw = data.get(descriptor.name).map(String::as_str);
        match validate_field(descriptor, raw, date_format) {
            Ok(Some(value)) => {
                result.cleaned.insert(descriptor.name.to_string(), value);
            }
            Ok(None) => {}
            Err(code) => result.push(RowError::new(code, descriptor.name)),
        }
    }
    result
}

/// 按目录的名称字段取出四元组（未提供的部分为空串）
fn name_parts<'a>(catalog: &FieldCatalog, result: &'a RowValidation) -> [&'a str; 4] {
    catalog.name_fields.map(|field| result.text(field).unwrap_or(""))
}

// ==========================================
// SpeciesRowValidator
// ==========================================
pub struct SpeciesRowValidator;

impl RowValidator for SpeciesRowValidator {
    fn catalog(&self) -> &'static FieldCatalog {
        ImportType::Species.catalog()
    }

    fn validate(
        &self,
        data: &RawRowData,
        lookup: &dyn ReferenceLookup,
        date_format: &str,
    ) -> RepositoryResult<RowValidation> {
        let catalog = self.catalog();
        let mut result = validate_catalog_fields(catalog, data, date_format);

        // 名称字段有误时不做匹配
        let name_ok = catalog.name_fields.iter().all(|f| !result.has_error_on(f));
        if name_ok && result.text(species_fields::GENUS).is_some() {
            let ids = lookup
                .species_by_name_parts(&name_parts(catalog, &result))?
                .into_iter()
                .map(|m| m.id)
                .collect();
            result.cleaned.insert(
                species_fields::POSSIBLE_MATCHES.to_string(),
                FieldValue::SpeciesMatches(ids),
            );
        }

        Ok(result)
    }
}

// ==========================================
// TreeRowValidator
// ==========================================
pub struct TreeRowValidator;

impl TreeRowValidator {
    fn validate_point(result: &mut RowValidation) {
        if let (Some(x), Some(y)) = (
            result.float(tree_fields::POINT_X),
            result.float(tree_fields::POINT_Y),
        ) {
            result
                .cleaned
                .insert(tree_fields::POINT.to_string(), FieldValue::Point { x, y });
        }
    }

    fn validate_species(
        catalog: &FieldCatalog,
        result: &mut RowValidation,
        lookup: &dyn ReferenceLookup,
    ) -> RepositoryResult<Option<SpeciesMatch>> {
        let provided: Vec<&str> = catalog
            .name_fields
            .iter()
            .copied()
            .filter(|f| result.text(f).is_some())
            .collect();
        if provided.is_empty() {
            return Ok(None);
        }
        if catalog.name_fields.iter().any(|f| result.has_error_on(f)) {
            return Ok(None);
        }

        let parts = name_parts(catalog, result);
        let matched = lookup.species_by_name_parts(&parts)?.into_iter().next();
        match matched {
            Some(species) => {
                result.cleaned.insert(
                    tree_fields::SPECIES_OBJECT.to_string(),
                    FieldValue::SpeciesRef(species.id),
                );
                Ok(Some(species))
            }
            None => {
                let name = parts
                    .iter()
                    .filter(|p| !p.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                result.push(RowError::for_fields(
                    ErrorCode::InvalidSpecies,
                    &provided,
                    Some(json!(name)),
                ));
                Ok(None)
            }
        }
    }

    fn validate_plot_id(
        result: &mut RowValidation,
        lookup: &dyn ReferenceLookup,
    ) -> RepositoryResult<()> {
        let plot_id = result
            .cleaned
            .get(tree_fields::OPENTREEMAP_PLOT_ID)
            .and_then(FieldValue::as_i64);
        if let Some(plot_id) = plot_id {
            if !lookup.plot_exists(plot_id)? {
                result.push(RowError::for_fields(
                    ErrorCode::InvalidOtmId,
                    &[tree_fields::OPENTREEMAP_PLOT_ID],
                    Some(json!(plot_id)),
                ));
            }
        }
        Ok(())
    }

    /// 树种上限警告（非致命）
    fn check_species_limits(result: &mut RowValidation, species: &SpeciesMatch) {
        let checks = [
            (
                tree_fields::DIAMETER,
                species.max_diameter,
                ErrorCode::SpeciesDbhTooHigh,
            ),
            (
                tree_fields::TREE_HEIGHT,
                species.max_height,
                ErrorCode::SpeciesHeightTooHigh,
            ),
        ];
        for (field, max, code) in checks {
            if let (Some(value), Some(max)) = (result.float(field), max) {
                if value > max {
                    result.push(RowError::for_fields(code, &[field], Some(json!(max))));
                }
            }
        }
    }
}

impl RowValidator for TreeRowValidator {
    fn catalog(&self) -> &'static FieldCatalog {
        ImportType::Tree.catalog()
    }

    fn validate(
        &self,
        data: &RawRowData,
        lookup: &dyn ReferenceLookup,
        date_format: &str,
    ) -> RepositoryResult<RowValidation> {
        let catalog = self.catalog();
        let mut result = validate_catalog_fields(catalog, data, date_format);

        Self::validate_point(&mut result);
        if let Some(species) = Self::validate_species(catalog, &mut result, lookup)? {
            Self::check_species_limits(&mut result, &species);
        }
        Self::validate_plot_id(&mut result, lookup)?;

        Ok(result)
    }
}
