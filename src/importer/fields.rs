// ==========================================
// 树木导入系统 - 字段目录
// ==========================================
// 职责: 每种导入类型的字段描述（名称 / 类型 / 角色 / 必填 / 最大长度）
// 说明:
// - 字段名为规范化后的表头（小写、单空格）
// - 伪字段（calc__*）不从输入读取，由行校验写入
// - 目录为 'static 常量，进程内只读
// ==========================================

use crate::domain::ImportType;

/// 字段值类型（封闭集合，校验器按此穷举分派）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Date,
    Boolean,
    PositiveInteger,
    PositiveFloat,
    Float,
}

/// 字段角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Input,  // 来自文件表头
    Pseudo, // 校验阶段计算
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub field_type: FieldType,
    pub role: FieldRole,
    pub required: bool,
    pub max_length: Option<usize>,
}

impl FieldDescriptor {
    const fn input(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            role: FieldRole::Input,
            required: false,
            max_length: None,
        }
    }

    const fn text(name: &'static str, max_length: usize) -> Self {
        Self {
            name,
            field_type: FieldType::String,
            role: FieldRole::Input,
            required: false,
            max_length: Some(max_length),
        }
    }

    const fn pseudo(name: &'static str) -> Self {
        Self {
            name,
            field_type: FieldType::String,
            role: FieldRole::Pseudo,
            required: false,
            max_length: None,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    pub fn is_input(&self) -> bool {
        self.role == FieldRole::Input
    }
}

// ==========================================
// 字段名常量
// ==========================================
pub mod species_fields {
    pub const GENUS: &str = "genus";
    pub const SPECIES: &str = "species";
    pub const CULTIVAR: &str = "cultivar";
    pub const OTHER_PART_OF_NAME: &str = "other part of name";
    pub const COMMON_NAME: &str = "common name";
    pub const IS_NATIVE: &str = "is native";
    pub const GENDER: &str = "gender";
    pub const FLOWERING_PERIOD: &str = "flowering period";
    pub const FRUIT_OR_NUT_PERIOD: &str = "fruit or nut period";
    pub const FALL_CONSPICUOUS: &str = "fall conspicuous";
    pub const FLOWER_CONSPICUOUS: &str = "flower conspicuous";
    pub const PALATABLE_HUMAN: &str = "palatable human";
    pub const HAS_WILDLIFE_VALUE: &str = "has wildlife value";
    pub const FACT_SHEET_URL: &str = "fact sheet url";
    pub const PLANT_GUIDE_URL: &str = "plant guide url";
    pub const ITREE_CODE: &str = "i-tree code";
    pub const MAX_DIAMETER: &str = "max diameter";
    pub const MAX_HEIGHT: &str = "max height";

    /// 伪字段: 同名既有树种 ID 列表
    pub const POSSIBLE_MATCHES: &str = "calc__species";
}

pub mod tree_fields {
    pub const POINT_X: &str = "point x";
    pub const POINT_Y: &str = "point y";

    pub const STREET_ADDRESS: &str = "street address";
    pub const CITY_ADDRESS: &str = "city";
    pub const POSTAL_CODE: &str = "postal code";
    pub const PLOT_WIDTH: &str = "plot width";
    pub const PLOT_LENGTH: &str = "plot length";
    pub const READ_ONLY: &str = "read only";
    pub const OPENTREEMAP_PLOT_ID: &str = "opentreemap plot id";
    pub const EXTERNAL_ID_NUMBER: &str = "external id number";
    pub const TREE_PRESENT: &str = "tree present";

    pub const GENUS: &str = "genus";
    pub const SPECIES: &str = "species";
    pub const CULTIVAR: &str = "cultivar";
    pub const OTHER_PART_OF_NAME: &str = "other part of name";

    pub const DIAMETER: &str = "diameter";
    pub const TREE_HEIGHT: &str = "tree height";
    pub const CANOPY_HEIGHT: &str = "canopy height";
    pub const DATE_PLANTED: &str = "date planted";

    /// 伪字段: 校验后的坐标
    pub const POINT: &str = "calc__point";
    /// 伪字段: 匹配到的树种
    pub const SPECIES_OBJECT: &str = "calc__species_object";
}

/// 名称匹配字段（顺序有意义: 越靠后越具体）
pub const NAME_MATCH_FIELDS: [&str; 4] = [
    species_fields::GENUS,
    species_fields::SPECIES,
    species_fields::CULTIVAR,
    species_fields::OTHER_PART_OF_NAME,
];

// ==========================================
// 目录定义
// ==========================================
static SPECIES_FIELDS: [FieldDescriptor; 19] = [
    FieldDescriptor::text(species_fields::GENUS, 255).required(),
    FieldDescriptor::text(species_fields::SPECIES, 255),
    FieldDescriptor::text(species_fields::CULTIVAR, 255),
    FieldDescriptor::text(species_fields::OTHER_PART_OF_NAME, 255),
    FieldDescriptor::text(species_fields::COMMON_NAME, 255).required(),
    FieldDescriptor::input(species_fields::IS_NATIVE, FieldType::Boolean),
    FieldDescriptor::text(species_fields::GENDER, 50),
    FieldDescriptor::text(species_fields::FLOWERING_PERIOD, 255),
    FieldDescriptor::text(species_fields::FRUIT_OR_NUT_PERIOD, 255),
    FieldDescriptor::input(species_fields::FALL_CONSPICUOUS, FieldType::Boolean),
    FieldDescriptor::input(species_fields::FLOWER_CONSPICUOUS, FieldType::Boolean),
    FieldDescriptor::input(species_fields::PALATABLE_HUMAN, FieldType::Boolean),
    FieldDescriptor::input(species_fields::HAS_WILDLIFE_VALUE, FieldType::Boolean),
    FieldDescriptor::text(species_fields::FACT_SHEET_URL, 255),
    FieldDescriptor::text(species_fields::PLANT_GUIDE_URL, 255),
    FieldDescriptor::text(species_fields::ITREE_CODE, 100),
    FieldDescriptor::input(species_fields::MAX_DIAMETER, FieldType::PositiveFloat),
    FieldDescriptor::input(species_fields::MAX_HEIGHT, FieldType::PositiveFloat),
    FieldDescriptor::pseudo(species_fields::POSSIBLE_MATCHES),
];

static TREE_FIELDS: [FieldDescriptor; 21] = [
    FieldDescriptor::input(tree_fields::POINT_X, FieldType::Float).required(),
    FieldDescriptor::input(tree_fields::POINT_Y, FieldType::Float).required(),
    FieldDescriptor::text(tree_fields::STREET_ADDRESS, 255),
    FieldDescriptor::text(tree_fields::CITY_ADDRESS, 255),
    FieldDescriptor::text(tree_fields::POSTAL_CODE, 30),
    FieldDescriptor::input(tree_fields::PLOT_WIDTH, FieldType::PositiveFloat),
    FieldDescriptor::input(tree_fields::PLOT_LENGTH, FieldType::PositiveFloat),
    FieldDescriptor::input(tree_fields::READ_ONLY, FieldType::Boolean),
    FieldDescriptor::input(tree_fields::OPENTREEMAP_PLOT_ID, FieldType::PositiveInteger),
    FieldDescriptor::text(tree_fields::EXTERNAL_ID_NUMBER, 255),
    FieldDescriptor::input(tree_fields::TREE_PRESENT, FieldType::Boolean),
    FieldDescriptor::text(tree_fields::GENUS, 255),
    FieldDescriptor::text(tree_fields::SPECIES, 255),
    FieldDescriptor::text(tree_fields::CULTIVAR, 255),
    FieldDescriptor::text(tree_fields::OTHER_PART_OF_NAME, 255),
    FieldDescriptor::input(tree_fields::DIAMETER, FieldType::PositiveFloat),
    FieldDescriptor::input(tree_fields::TREE_HEIGHT, FieldType::PositiveFloat),
    FieldDescriptor::input(tree_fields::CANOPY_HEIGHT, FieldType::PositiveFloat),
    FieldDescriptor::input(tree_fields::DATE_PLANTED, FieldType::Date),
    FieldDescriptor::pseudo(tree_fields::POINT),
    FieldDescriptor::pseudo(tree_fields::SPECIES_OBJECT),
];

pub static SPECIES_CATALOG: FieldCatalog = FieldCatalog {
    import_type: ImportType::Species,
    fields: &SPECIES_FIELDS,
    name_fields: &NAME_MATCH_FIELDS,
};

pub static TREE_CATALOG: FieldCatalog = FieldCatalog {
    import_type: ImportType::Tree,
    fields: &TREE_FIELDS,
    name_fields: &NAME_MATCH_FIELDS,
};

// ==========================================
// FieldCatalog - 字段目录
// ==========================================
#[derive(Debug)]
pub struct FieldCatalog {
    pub import_type: ImportType,
    pub fields: &'static [FieldDescriptor],
    /// 树种名称匹配字段（genus, species, cultivar, other part of name 顺序）
    pub name_fields: &'static [&'static str; 4],
}

impl FieldCatalog {
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_input())
    }

    pub fn is_input_field(&self, name: &str) -> bool {
        self.get(name).map(|f| f.is_input()).unwrap_or(false)
    }

    /// 返回不属于本目录输入字段的名称（保持出现顺序）
    pub fn unknown_fields<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.is_input_field(name))
            .collect()
    }
}

impl ImportType {
    /// 导入类型对应的字段目录
    pub fn catalog(&self) -> &'static FieldCatalog {
        match self {
            ImportType::Species => &SPECIES_CATALOG,
            ImportType::Tree => &TREE_CATALOG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_unique_per_catalog() {
        for catalog in [&SPECIES_CATALOG, &TREE_CATALOG] {
            let names: HashSet<&str> = catalog.fields.iter().map(|f| f.name).collect();
            assert_eq!(names.len(), catalog.fields.len(), "{:?} 字段名重复", catalog.import_type);
        }
    }

    #[test]
    fn test_pseudo_fields_are_not_input() {
        assert!(!TREE_CATALOG.is_input_field(tree_fields::POINT));
        assert!(!SPECIES_CATALOG.is_input_field(species_fields::POSSIBLE_MATCHES));
        assert!(TREE_CATALOG.is_input_field(tree_fields::DIAMETER));
    }

    #[test]
    fn test_required_fields() {
        let required: Vec<&str> = TREE_CATALOG
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();
        assert_eq!(required, vec!["point x", "point y"]);

        assert!(SPECIES_CATALOG.get("common name").unwrap().required);
    }

    #[test]
    fn test_unknown_fields_preserve_order() {
        let names = vec![
            "point x".to_string(),
            "favorite color".to_string(),
            "calc__point".to_string(),
        ];
        assert_eq!(
            TREE_CATALOG.unknown_fields(&names),
            vec!["favorite color", "calc__point"]
        );
    }

    #[test]
    fn test_catalog_dispatch() {
        assert_eq!(ImportType::Tree.catalog().import_type, ImportType::Tree);
        assert_eq!(
            ImportType::Species.catalog().name_fields,
            &["genus", "species", "cultivar", "other part of name"]
        );
    }
}
