//! Static model registry used by the listing and form engines.
//!
//! `model_mappings` names a model per table; the registry says which table,
//! columns and relations that model has.

use retrack_database::EngineRepository;

use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `parent.foreign_key = related.owner_key`
    BelongsTo {
        foreign_key: &'static str,
        owner_key: &'static str,
    },
    /// `related.foreign_key = parent.local_key`
    HasMany {
        foreign_key: &'static str,
        local_key: &'static str,
    },
    /// Through `pivot`, keyed by the parent and related primary keys.
    BelongsToMany {
        pivot: &'static str,
        parent_pivot_key: &'static str,
        related_pivot_key: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    pub name: &'static str,
    /// Model name of the related side.
    pub related: &'static str,
    pub kind: RelationKind,
}

impl RelationSpec {
    /// Column on the parent row the relation is keyed by.
    pub fn parent_key(&self, parent: &ModelSpec) -> &'static str {
        match self.kind {
            RelationKind::BelongsTo { foreign_key, .. } => foreign_key,
            RelationKind::HasMany { local_key, .. } => local_key,
            RelationKind::BelongsToMany { .. } => parent.primary_key,
        }
    }

    /// Column on the related rows matched against [`parent_key`](Self::parent_key).
    pub fn related_key(&self, related: &ModelSpec) -> &'static str {
        match self.kind {
            RelationKind::BelongsTo { owner_key, .. } => owner_key,
            RelationKind::HasMany { foreign_key, .. } => foreign_key,
            RelationKind::BelongsToMany { .. } => related.primary_key,
        }
    }

    pub fn related_model(&self) -> Option<&'static ModelSpec> {
        model(self.related)
    }

    /// Key used when the relation is serialized.
    pub fn output_key(&self) -> String {
        snake_case(self.name)
    }

    pub fn is_many(&self) -> bool {
        !matches!(self.kind, RelationKind::BelongsTo { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub fillable: &'static [&'static str],
    pub hidden: &'static [&'static str],
    /// Filled with a v4 uuid on create.
    pub uuid_column: Option<&'static str>,
    /// Filled with a cuid2 on create.
    pub public_id_column: Option<&'static str>,
    pub soft_deletes: bool,
    pub relations: &'static [RelationSpec],
}

impl ModelSpec {
    pub fn relation(&self, name: &str) -> Option<&'static RelationSpec> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn is_fillable(&self, column: &str) -> bool {
        self.fillable.contains(&column)
    }

    pub fn is_hidden(&self, column: &str) -> bool {
        self.hidden.contains(&column)
    }
}

const fn belongs_to(
    name: &'static str,
    related: &'static str,
    foreign_key: &'static str,
    owner_key: &'static str,
) -> RelationSpec {
    RelationSpec {
        name,
        related,
        kind: RelationKind::BelongsTo {
            foreign_key,
            owner_key,
        },
    }
}

const USER: ModelSpec = ModelSpec {
    name: "User",
    table: "users",
    primary_key: "id",
    fillable: &["name", "email", "password", "role"],
    hidden: &["password"],
    uuid_column: None,
    public_id_column: Some("public_id"),
    soft_deletes: false,
    relations: &[],
};

const MENTOR: ModelSpec = ModelSpec {
    name: "Mentor",
    table: "mentors",
    primary_key: "id",
    fillable: &["user_id", "nama_penuh", "pangkat", "parol_daerah"],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("user", "User", "user_id", "id"),
        RelationSpec {
            name: "mentees",
            related: "Mentee",
            kind: RelationKind::HasMany {
                foreign_key: "mentor_id",
                local_key: "user_id",
            },
        },
    ],
};

const ADMIN: ModelSpec = ModelSpec {
    name: "Admin",
    table: "admins",
    primary_key: "id",
    fillable: &["user_id", "nama_penuh", "pangkat", "parol_daerah"],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[belongs_to("user", "User", "user_id", "id")],
};

const MENTEE: ModelSpec = ModelSpec {
    name: "Mentee",
    table: "mentees",
    primary_key: "id",
    fillable: &[
        "user_id",
        "id_prospek",
        "daerah",
        "jantina",
        "no_tel",
        "alamat_rumah",
        "huraian_alamat",
        "rumah_lat",
        "rumah_long",
        "tarikh_bebas",
        "mentor_id",
        "kategori_prospek",
        "jenis_penamatan",
        "nama_waris_1",
        "no_tel_waris_1",
        "nama_waris_2",
        "no_tel_waris_2",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("user", "User", "user_id", "id"),
        belongs_to("mentor", "User", "mentor_id", "id"),
    ],
};

const LAPORAN: ModelSpec = ModelSpec {
    name: "Laporan",
    table: "laporan",
    primary_key: "id",
    fillable: &[
        "alamat",
        "alamat_lat",
        "alamat_long",
        "tujuan",
        "bukti_audio",
        "bukti_gambar",
        "mentor_id",
        "mentee_id",
        "status",
        "ulasan",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("mentor", "Mentor", "mentor_id", "user_id"),
        belongs_to("mentee", "Mentee", "mentee_id", "user_id"),
        belongs_to("mentorAccount", "User", "mentor_id", "id"),
        belongs_to("menteeAccount", "User", "mentee_id", "id"),
    ],
};

const LAPOR_DIRI: ModelSpec = ModelSpec {
    name: "LaporDiri",
    table: "lapordiri",
    primary_key: "id",
    fillable: &[
        "tarikh",
        "masa",
        "tempat",
        "mentee_id",
        "status_kehadiran",
        "lapor_diri_pada",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("mentee", "Mentee", "mentee_id", "user_id"),
        belongs_to("menteeAccount", "User", "mentee_id", "id"),
    ],
};

const HEALTH_MONITORING: ModelSpec = ModelSpec {
    name: "HealthMonitoring",
    table: "health_monitorings",
    primary_key: "id",
    fillable: &[
        "mentee_id",
        "date",
        "mood",
        "stress",
        "sleep_quality",
        "meaningful_activity",
        "motivation",
        "support_need",
        "substance_use",
        "substance_use_other",
        "craving_score",
        "weekly_challenge",
        "total_score",
        "risk_zone",
    ],
    hidden: &[],
    uuid_column: Some("uuid"),
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("mentee", "Mentee", "mentee_id", "user_id"),
        belongs_to("menteeAccount", "User", "mentee_id", "id"),
    ],
};

const HEALTH_QUESTION: ModelSpec = ModelSpec {
    name: "HealthQuestion",
    table: "health_questions",
    primary_key: "id",
    fillable: &[
        "domain",
        "question_text",
        "type",
        "choices",
        "field_key",
        "is_active",
        "is_weekly",
        "order",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[],
};

const STAFF_MONITORING: ModelSpec = ModelSpec {
    name: "StaffMonitoring",
    table: "staff_monitorings",
    primary_key: "id",
    fillable: &[
        "kategori",
        "mentee_id",
        "csi_id",
        "rt_no",
        "alamat_baru",
        "huraian_alamat",
        "current_alamat",
        "current_lat",
        "current_long",
        "laporan_pemantauan",
        "mentor_id",
        "user_id",
        "gambar",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[
        belongs_to("mentee", "Mentee", "mentee_id", "user_id"),
        belongs_to("csi", "Csi", "csi_id", "id"),
        belongs_to("mentor", "Mentor", "mentor_id", "user_id"),
        belongs_to("user", "User", "user_id", "id"),
        belongs_to("menteeAccount", "User", "mentee_id", "id"),
        belongs_to("mentorAccount", "User", "mentor_id", "id"),
    ],
};

const CSI: ModelSpec = ModelSpec {
    name: "Csi",
    table: "csi",
    primary_key: "id",
    fillable: &[
        "nama_syarikat",
        "syarikat_lat",
        "syarikat_long",
        "alamat_syarikat",
        "huraian_alamat",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[],
};

const BLOG: ModelSpec = ModelSpec {
    name: "Blog",
    table: "blogs",
    primary_key: "id",
    fillable: &[
        "title",
        "slug",
        "excerpt",
        "content",
        "featured_image",
        "status",
        "author_id",
    ],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: true,
    relations: &[
        belongs_to("author", "User", "author_id", "id"),
        RelationSpec {
            name: "categories",
            related: "Category",
            kind: RelationKind::BelongsToMany {
                pivot: "blog_category",
                parent_pivot_key: "blog_id",
                related_pivot_key: "category_id",
            },
        },
        RelationSpec {
            name: "tags",
            related: "Tag",
            kind: RelationKind::BelongsToMany {
                pivot: "blog_tag",
                parent_pivot_key: "blog_id",
                related_pivot_key: "tag_id",
            },
        },
    ],
};

const CATEGORY: ModelSpec = ModelSpec {
    name: "Category",
    table: "categories",
    primary_key: "id",
    fillable: &["name", "slug"],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[],
};

const TAG: ModelSpec = ModelSpec {
    name: "Tag",
    table: "tags",
    primary_key: "id",
    fillable: &["name", "slug"],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[],
};

const FORM_UPDATE_LOG: ModelSpec = ModelSpec {
    name: "FormUpdateLog",
    table: "form_update_logs",
    primary_key: "id",
    fillable: &["form_name", "table_name", "record_id", "changes", "updated_by"],
    hidden: &[],
    uuid_column: None,
    public_id_column: None,
    soft_deletes: false,
    relations: &[belongs_to("user", "User", "updated_by", "id")],
};

static MODELS: &[ModelSpec] = &[
    USER,
    MENTOR,
    ADMIN,
    MENTEE,
    LAPORAN,
    LAPOR_DIRI,
    HEALTH_MONITORING,
    HEALTH_QUESTION,
    STAFF_MONITORING,
    CSI,
    BLOG,
    CATEGORY,
    TAG,
    FORM_UPDATE_LOG,
];

pub fn models() -> &'static [ModelSpec] {
    MODELS
}

pub fn model(name: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|spec| spec.name == name)
}

pub fn model_for_table(table: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|spec| spec.table == table)
}

/// Model for `table`: the `model_mappings` entry first, then the StudlyCase singular name.
pub async fn resolve_model(
    engine: &EngineRepository,
    table: &str,
) -> Result<Option<&'static ModelSpec>, ServiceError> {
    if let Some(class) = engine.model_class_for(table).await? {
        if let Some(spec) = model(class_basename(&class)) {
            return Ok(Some(spec));
        }
    }

    Ok(model(&studly_singular(table)))
}

/// `App\Models\Laporan` -> `Laporan`.
pub fn class_basename(class: &str) -> &str {
    class
        .trim()
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(class)
}

/// `health_monitorings` -> `HealthMonitoring`.
pub fn studly_singular(table: &str) -> String {
    let singular = singularize(table);
    singular
        .split(['_', '-', ' '])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with("ss") {
        word.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

/// `mentorAccount` -> `mentor_account`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_utils::create_test_db;

    #[test]
    fn table_names_map_to_model_names() {
        assert_eq!(studly_singular("health_monitorings"), "HealthMonitoring");
        assert_eq!(studly_singular("categories"), "Category");
        assert_eq!(studly_singular("laporan"), "Laporan");
        assert_eq!(studly_singular("csi"), "Csi");
        assert_eq!(class_basename("App\\Models\\LaporDiri"), "LaporDiri");
        assert_eq!(class_basename("Mentor"), "Mentor");
    }

    #[test]
    fn relation_names_serialize_in_snake_case() {
        assert_eq!(snake_case("mentorAccount"), "mentor_account");
        assert_eq!(snake_case("user"), "user");
    }

    #[test]
    fn every_relation_points_at_a_registered_model() {
        for spec in models() {
            for relation in spec.relations {
                assert!(
                    relation.related_model().is_some(),
                    "{}.{} targets unknown model {}",
                    spec.name,
                    relation.name,
                    relation.related
                );
            }
        }
    }

    #[test]
    fn relation_keys() {
        let mentor = model("Mentor").unwrap();
        let mentees = mentor.relation("mentees").unwrap();
        assert_eq!(mentees.parent_key(mentor), "user_id");
        assert_eq!(mentees.related_key(mentees.related_model().unwrap()), "mentor_id");
        assert!(mentees.is_many());

        let blog = model("Blog").unwrap();
        let categories = blog.relation("categories").unwrap();
        assert_eq!(categories.parent_key(blog), "id");
    }

    #[tokio::test]
    async fn resolve_prefers_mapping_then_name() {
        let (pool, _dir) = create_test_db().await;
        let engine = EngineRepository::new(pool.clone());

        let spec = resolve_model(&engine, "lapordiri").await.unwrap().unwrap();
        assert_eq!(spec.name, "LaporDiri");

        sqlx::query("DELETE FROM model_mappings WHERE key = 'health_monitorings'")
            .execute(&pool)
            .await
            .unwrap();
        let spec = resolve_model(&engine, "health_monitorings").await.unwrap().unwrap();
        assert_eq!(spec.table, "health_monitorings");

        assert!(resolve_model(&engine, "nonexistent_things").await.unwrap().is_none());
    }
}
