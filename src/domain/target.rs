// ==========================================
// 树木导入系统 - 目标领域记录
// ==========================================
// 提交阶段写入的业务实体: 树种 / 样地 / 树木
// 对齐: species / plot / tree 表
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Species - 树种
// ==========================================
// 身份键: (genus, species, cultivar, other_part_of_name)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: i64,
    pub genus: String,
    pub species: String,
    pub cultivar: String,
    pub other_part_of_name: String,
    pub common_name: Option<String>,
    pub is_native: Option<bool>,
    pub gender: Option<String>,
    pub flowering_period: Option<String>,
    pub fruit_or_nut_period: Option<String>,
    pub fall_conspicuous: Option<bool>,
    pub flower_conspicuous: Option<bool>,
    pub palatable_human: Option<bool>,
    pub has_wildlife_value: Option<bool>,
    pub fact_sheet_url: Option<String>,
    pub plant_guide_url: Option<String>,
    pub itree_code: Option<String>,
    pub max_diameter: Option<f64>,
    pub max_height: Option<f64>,
}

impl Species {
    /// 学名（genus species 'cultivar' other）
    pub fn scientific_name(&self) -> String {
        let mut name = self.genus.clone();
        if !self.species.is_empty() {
            name.push(' ');
            name.push_str(&self.species);
        }
        if !self.cultivar.is_empty() {
            name.push_str(&format!(" '{}'", self.cultivar));
        }
        if !self.other_part_of_name.is_empty() {
            name.push(' ');
            name.push_str(&self.other_part_of_name);
        }
        name
    }
}

/// 按名称匹配到的树种（校验阶段使用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesMatch {
    pub id: i64,
    pub max_diameter: Option<f64>,
    pub max_height: Option<f64>,
}

// ==========================================
// Plot - 样地
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: i64,
    pub x: f64,
    pub y: f64,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub width: Option<f64>,
    pub length: Option<f64>,
    pub read_only: Option<bool>,
    pub external_id: Option<String>,
}

// ==========================================
// Tree - 树木（每个样地至多一棵）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub id: i64,
    pub plot_id: i64,
    pub species_id: Option<i64>,
    pub diameter: Option<f64>,
    pub height: Option<f64>,
    pub canopy_height: Option<f64>,
    pub date_planted: Option<NaiveDate>,
}
