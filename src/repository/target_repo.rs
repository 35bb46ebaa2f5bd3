// ==========================================
// 树木导入系统 - 目标实体 Repository
// ==========================================
// 职责: species / plot / tree 表读写
// 说明:
// - 写入均为 *_tx 关联函数，由提交分块在同一事务内调用
// - 所有写入按目标身份键 upsert，分块重放不产生重复记录
//   species: (genus, species, cultivar, other_part_of_name)，大小写不敏感
//   plot:    (import_event_id, import_row_idx)
//   tree:    plot_id
// ==========================================

use crate::domain::{Plot, Species, SpeciesMatch, Tree};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct TargetRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TargetRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按名称四元组查询树种（空串表示该部分为空）
    pub fn find_species_by_name_parts(
        &self,
        genus: &str,
        species: &str,
        cultivar: &str,
        other_part_of_name: &str,
    ) -> RepositoryResult<Vec<SpeciesMatch>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, max_diameter, max_height
            FROM species
            WHERE genus = ?1 AND species = ?2 AND cultivar = ?3 AND other_part_of_name = ?4
            ORDER BY id ASC
            "#,
        )?;
        let matches = stmt
            .query_map(
                params![genus.trim(), species.trim(), cultivar.trim(), other_part_of_name.trim()],
                |row| {
                    Ok(SpeciesMatch {
                        id: row.get(0)?,
                        max_diameter: row.get(1)?,
                        max_height: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    pub fn plot_exists(&self, plot_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row("SELECT 1 FROM plot WHERE id = ?1", params![plot_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn find_species(&self, species_id: i64) -> RepositoryResult<Option<Species>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT id, genus, species, cultivar, other_part_of_name, common_name,
                   is_native, gender, flowering_period, fruit_or_nut_period,
                   fall_conspicuous, flower_conspicuous, palatable_human, has_wildlife_value,
                   fact_sheet_url, plant_guide_url, itree_code, max_diameter, max_height
            FROM species
            WHERE id = ?1
            "#,
            params![species_id],
            |row| {
                Ok(Species {
                    id: row.get(0)?,
                    genus: row.get(1)?,
                    species: row.get(2)?,
                    cultivar: row.get(3)?,
                    other_part_of_name: row.get(4)?,
                    common_name: row.get(5)?,
                    is_native: row.get(6)?,
                    gender: row.get(7)?,
                    flowering_period: row.get(8)?,
                    fruit_or_nut_period: row.get(9)?,
                    fall_conspicuous: row.get(10)?,
                    flower_conspicuous: row.get(11)?,
                    palatable_human: row.get(12)?,
                    has_wildlife_value: row.get(13)?,
                    fact_sheet_url: row.get(14)?,
                    plant_guide_url: row.get(15)?,
                    itree_code: row.get(16)?,
                    max_diameter: row.get(17)?,
                    max_height: row.get(18)?,
                })
            },
        )
        .optional()
        .map_err(|e| e.into())
    }

    pub fn find_tree_by_plot(&self, plot_id: i64) -> RepositoryResult<Option<Tree>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT id, plot_id, species_id, diameter, height, canopy_height, date_planted
            FROM tree
            WHERE plot_id = ?1
            "#,
            params![plot_id],
            |row| {
                Ok(Tree {
                    id: row.get(0)?,
                    plot_id: row.get(1)?,
                    species_id: row.get(2)?,
                    diameter: row.get(3)?,
                    height: row.get(4)?,
                    canopy_height: row.get(5)?,
                    date_planted: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| e.into())
    }

    pub fn count_species(&self) -> RepositoryResult<i64> {
        self.count_table("species")
    }

    pub fn count_plots(&self) -> RepositoryResult<i64> {
        self.count_table("plot")
    }

    pub fn count_trees(&self) -> RepositoryResult<i64> {
        self.count_table("tree")
    }

    fn count_table(&self, table: &'static str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// 直接写入样地（初始化既有数据 / 测试）
    pub fn insert_plot(&self, plot: &Plot) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO plot (x, y, street_address, city, postal_code, width, length,
                              read_only, external_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                plot.x,
                plot.y,
                plot.street_address,
                plot.city,
                plot.postal_code,
                plot.width,
                plot.length,
                plot.read_only,
                plot.external_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 直接写入树种（初始化既有数据 / 测试）
    pub fn insert_species(&self, species: &Species) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::upsert_species_tx(&conn, species)
    }

    // ==========================================
    // 事务内写入
    // ==========================================

    /// 按名称身份 upsert 树种，返回树种 ID
    ///
    /// 未提供的描述字段（None）不会覆盖已有值
    pub fn upsert_species_tx(conn: &Connection, species: &Species) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO species (
                genus, species, cultivar, other_part_of_name, common_name,
                is_native, gender, flowering_period, fruit_or_nut_period,
                fall_conspicuous, flower_conspicuous, palatable_human, has_wildlife_value,
                fact_sheet_url, plant_guide_url, itree_code, max_diameter, max_height,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
            )
            ON CONFLICT(genus, species, cultivar, other_part_of_name) DO UPDATE SET
                common_name = COALESCE(excluded.common_name, common_name),
                is_native = COALESCE(excluded.is_native, is_native),
                gender = COALESCE(excluded.gender, gender),
                flowering_period = COALESCE(excluded.flowering_period, flowering_period),
                fruit_or_nut_period = COALESCE(excluded.fruit_or_nut_period, fruit_or_nut_period),
                fall_conspicuous = COALESCE(excluded.fall_conspicuous, fall_conspicuous),
                flower_conspicuous = COALESCE(excluded.flower_conspicuous, flower_conspicuous),
                palatable_human = COALESCE(excluded.palatable_human, palatable_human),
                has_wildlife_value = COALESCE(excluded.has_wildlife_value, has_wildlife_value),
                fact_sheet_url = COALESCE(excluded.fact_sheet_url, fact_sheet_url),
                plant_guide_url = COALESCE(excluded.plant_guide_url, plant_guide_url),
                itree_code = COALESCE(excluded.itree_code, itree_code),
                max_diameter = COALESCE(excluded.max_diameter, max_diameter),
                max_height = COALESCE(excluded.max_height, max_height),
                updated_at = excluded.updated_at
            "#,
            params![
                species.genus.trim(),
                species.species.trim(),
                species.cultivar.trim(),
                species.other_part_of_name.trim(),
                species.common_name,
                species.is_native,
                species.gender,
                species.flowering_period,
                species.fruit_or_nut_period,
                species.fall_conspicuous,
                species.flower_conspicuous,
                species.palatable_human,
                species.has_wildlife_value,
                species.fact_sheet_url,
                species.plant_guide_url,
                species.itree_code,
                species.max_diameter,
                species.max_height,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            r#"
            SELECT id FROM species
            WHERE genus = ?1 AND species = ?2 AND cultivar = ?3 AND other_part_of_name = ?4
            "#,
            params![
                species.genus.trim(),
                species.species.trim(),
                species.cultivar.trim(),
                species.other_part_of_name.trim(),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 按来源行 upsert 新样地，返回样地 ID
    pub fn upsert_plot_for_row_tx(
        conn: &Connection,
        event_id: i64,
        row_idx: i64,
        plot: &Plot,
    ) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO plot (x, y, street_address, city, postal_code, width, length,
                              read_only, external_id, import_event_id, import_row_idx, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(import_event_id, import_row_idx) DO UPDATE SET
                x = excluded.x,
                y = excluded.y,
                street_address = excluded.street_address,
                city = excluded.city,
                postal_code = excluded.postal_code,
                width = excluded.width,
                length = excluded.length,
                read_only = excluded.read_only,
                external_id = excluded.external_id,
                updated_at = excluded.updated_at
            "#,
            params![
                plot.x,
                plot.y,
                plot.street_address,
                plot.city,
                plot.postal_code,
                plot.width,
                plot.length,
                plot.read_only,
                plot.external_id,
                event_id,
                row_idx,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM plot WHERE import_event_id = ?1 AND import_row_idx = ?2",
            params![event_id, row_idx],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 原地更新既有样地（行中给出了 opentreemap plot id）
    pub fn update_plot_tx(conn: &Connection, plot: &Plot) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE plot SET
                x = ?1,
                y = ?2,
                street_address = COALESCE(?3, street_address),
                city = COALESCE(?4, city),
                postal_code = COALESCE(?5, postal_code),
                width = COALESCE(?6, width),
                length = COALESCE(?7, length),
                read_only = COALESCE(?8, read_only),
                external_id = COALESCE(?9, external_id),
                updated_at = ?10
            WHERE id = ?11
            "#,
            params![
                plot.x,
                plot.y,
                plot.street_address,
                plot.city,
                plot.postal_code,
                plot.width,
                plot.length,
                plot.read_only,
                plot.external_id,
                Utc::now().to_rfc3339(),
                plot.id,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Plot".to_string(),
                id: plot.id.to_string(),
            });
        }
        Ok(())
    }

    /// 按样地 upsert 树木（每个样地至多一棵），返回树木 ID
    pub fn upsert_tree_tx(conn: &Connection, tree: &Tree) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO tree (plot_id, species_id, diameter, height, canopy_height,
                              date_planted, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(plot_id) DO UPDATE SET
                species_id = COALESCE(excluded.species_id, species_id),
                diameter = COALESCE(excluded.diameter, diameter),
                height = COALESCE(excluded.height, height),
                canopy_height = COALESCE(excluded.canopy_height, canopy_height),
                date_planted = COALESCE(excluded.date_planted, date_planted),
                updated_at = excluded.updated_at
            "#,
            params![
                tree.plot_id,
                tree.species_id,
                tree.diameter,
                tree.height,
                tree.canopy_height,
                tree.date_planted,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM tree WHERE plot_id = ?1",
            params![tree.plot_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;

    fn setup_repo() -> TargetRepository {
        let conn = open_in_memory_connection().unwrap();
        TargetRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn acer(common_name: Option<&str>) -> Species {
        Species {
            genus: "Acer".to_string(),
            species: "rubrum".to_string(),
            common_name: common_name.map(str::to_string),
            max_diameter: Some(80.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_species_upsert_is_case_insensitive() {
        let repo = setup_repo();
        let first = repo.insert_species(&acer(Some("Red Maple"))).unwrap();

        let mut shouting = acer(None);
        shouting.genus = "ACER".to_string();
        shouting.species = "Rubrum".to_string();
        let second = repo.insert_species(&shouting).unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.count_species().unwrap(), 1);
        let stored = repo.find_species(first).unwrap().unwrap();
        assert_eq!(stored.common_name.as_deref(), Some("Red Maple"), "None 不应覆盖已有值");
    }

    #[test]
    fn test_find_species_by_name_parts() {
        let repo = setup_repo();
        let id = repo.insert_species(&acer(Some("Red Maple"))).unwrap();

        let matches = repo
            .find_species_by_name_parts("acer", "RUBRUM", "", "")
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);
        assert_eq!(matches[0].max_diameter, Some(80.0));

        assert!(repo
            .find_species_by_name_parts("Acer", "rubrum", "October Glory", "")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_plot_and_tree_upserts_are_keyed() {
        let repo = setup_repo();
        let plot = Plot {
            x: 1.0,
            y: 2.0,
            ..Default::default()
        };

        let conn = repo.get_conn().unwrap();
        let first = TargetRepository::upsert_plot_for_row_tx(&conn, 1, 0, &plot).unwrap();
        let again = TargetRepository::upsert_plot_for_row_tx(&conn, 1, 0, &plot).unwrap();
        assert_eq!(first, again);

        let tree = Tree {
            plot_id: first,
            diameter: Some(12.0),
            ..Default::default()
        };
        let t1 = TargetRepository::upsert_tree_tx(&conn, &tree).unwrap();
        let t2 = TargetRepository::upsert_tree_tx(&conn, &tree).unwrap();
        assert_eq!(t1, t2);
        drop(conn);

        assert_eq!(repo.count_plots().unwrap(), 1);
        assert_eq!(repo.count_trees().unwrap(), 1);
    }

    #[test]
    fn test_update_missing_plot_is_not_found() {
        let repo = setup_repo();
        let conn = repo.get_conn().unwrap();
        let plot = Plot {
            id: 404,
            ..Default::default()
        };
        let result = TargetRepository::update_plot_tx(&conn, &plot);
        assert!(matches!(result, Err(RepositoryError::NotFound { .. })));
    }
}
