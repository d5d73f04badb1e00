//! Back-reference resolution
//!
//! Second initialization pass. Every relationship field is paired with the
//! field on the related model that points back, which decides its kind:
//!
//! | this field     | paired field    | relationship |
//! |----------------|-----------------|--------------|
//! | foreign key    | collection      | BelongsTo    |
//! | foreign key    | foreign key     | HasOne (column moves to the related side) |
//! | collection     | foreign key     | HasMany      |
//! | collection     | collection      | ManyToMany   |
//!
//! A collection needs a pairing. It may be declared on either side; a
//! foreign key without one is a plain BelongsTo.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use super::inference::InferredModel;
use super::metadata::{
    ColumnReference, FieldKind, ForeignKeyConfig, JunctionColumn, JunctionTableDef, PivotConfig,
    RelationshipMetadata, RelationshipType,
};
use crate::error::{SchemaError, SchemaResult};
use crate::naming::{junction_column_name, junction_table_name, qualified_junction_table_name};

/// Output of back-reference resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRelationships {
    /// model -> field -> relationship, in declaration order
    pub relationships: IndexMap<String, IndexMap<String, RelationshipMetadata>>,
    /// Junction tables in first-seen order
    pub junctions: IndexMap<String, JunctionTableDef>,
    /// Foreign key fields that became one-to-one inverses and lose their column
    pub inverse_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    BelongsTo { inverse: Option<String> },
    HasOne { column: String },
    HasMany { column: String },
    ManyToMany { remote_field: String },
}

/// `(model, field)` sides of a many-to-many pair, ordered
type Pair = ((String, String), (String, String));

fn pair_of(a: (&str, &str), b: (&str, &str)) -> Pair {
    let a = (a.0.to_string(), a.1.to_string());
    let b = (b.0.to_string(), b.1.to_string());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Pairs relationship fields across all inferred models
pub struct BackReferenceResolver<'a> {
    models: &'a IndexMap<String, InferredModel>,
}

impl<'a> BackReferenceResolver<'a> {
    pub fn new(models: &'a IndexMap<String, InferredModel>) -> Self {
        Self { models }
    }

    pub fn resolve(&self) -> SchemaResult<ResolvedRelationships> {
        let mut resolutions: IndexMap<(String, String), (String, Resolution)> = IndexMap::new();

        for (name, model) in self.models {
            self.check_back_reference_keys(model)?;

            for (field, kind) in &model.fields {
                let resolution = match kind {
                    FieldKind::ForeignKey { target, .. } => self.resolve_foreign_key(model, field, target)?,
                    FieldKind::Collection { target } => self.resolve_collection(model, field, target)?,
                    FieldKind::Scalar { .. } | FieldKind::Inverse { .. } => continue,
                };
                let target = kind.target().unwrap_or_default().to_string();
                resolutions.insert((name.clone(), field.clone()), (target, resolution));
            }
        }

        let pairs: IndexSet<Pair> = resolutions
            .iter()
            .filter_map(|((model, field), (target, resolution))| match resolution {
                Resolution::ManyToMany { remote_field } => {
                    Some(pair_of((model, field), (target, remote_field)))
                }
                _ => None,
            })
            .collect();

        let mut pairs_per_models: HashMap<(String, String), usize> = HashMap::new();
        for ((a, _), (b, _)) in &pairs {
            *pairs_per_models.entry((a.clone(), b.clone())).or_default() += 1;
        }

        let mut resolved = ResolvedRelationships::default();
        for ((model, field), (target, resolution)) in resolutions {
            let owner = &self.models[&model];
            let related = &self.models[&target];

            let metadata = match resolution {
                Resolution::BelongsTo { inverse } => RelationshipMetadata::new(
                    RelationshipType::BelongsTo,
                    field.clone(),
                    target.clone(),
                    related.table.name.clone(),
                    ForeignKeyConfig::new(owner.table.name.clone(), field.clone()),
                )
                .with_inverse(inverse),
                Resolution::HasOne { column } => {
                    resolved.inverse_fields.push((model.clone(), field.clone()));
                    RelationshipMetadata::new(
                        RelationshipType::HasOne,
                        field.clone(),
                        target.clone(),
                        related.table.name.clone(),
                        ForeignKeyConfig::new(related.table.name.clone(), column.clone()),
                    )
                    .with_inverse(Some(column))
                }
                Resolution::HasMany { column } => RelationshipMetadata::new(
                    RelationshipType::HasMany,
                    field.clone(),
                    target.clone(),
                    related.table.name.clone(),
                    ForeignKeyConfig::new(related.table.name.clone(), column.clone()),
                )
                .with_inverse(Some(column)),
                Resolution::ManyToMany { remote_field } => {
                    let pair = pair_of((&model, &field), (&target, &remote_field));
                    let shared = pairs_per_models
                        .get(&(pair.0 .0.clone(), pair.1 .0.clone()))
                        .copied()
                        .unwrap_or(1);
                    let junction = self.junction_table(&pair, shared > 1)?;

                    let (local_key, foreign_key) = if pair.0 == (model.clone(), field.clone()) {
                        (junction.left.name.clone(), junction.right.name.clone())
                    } else {
                        (junction.right.name.clone(), junction.left.name.clone())
                    };

                    let metadata = RelationshipMetadata::new(
                        RelationshipType::ManyToMany,
                        field.clone(),
                        target.clone(),
                        related.table.name.clone(),
                        ForeignKeyConfig::new(junction.name.clone(), local_key.clone()),
                    )
                    .with_pivot(PivotConfig {
                        table: junction.name.clone(),
                        local_key,
                        foreign_key,
                    })
                    .with_inverse(Some(remote_field));

                    resolved.junctions.entry(junction.name.clone()).or_insert(junction);
                    metadata
                }
            };

            resolved
                .relationships
                .entry(model)
                .or_default()
                .insert(field, metadata);
        }

        Ok(resolved)
    }

    /// Every back-reference key must name a relationship field
    fn check_back_reference_keys(&self, model: &InferredModel) -> SchemaResult<()> {
        for field in model.descriptor.options.back_references.keys() {
            match model.fields.get(field) {
                Some(kind) if kind.is_relationship() => {}
                _ => {
                    return Err(SchemaError::configuration(
                        &model.descriptor.name,
                        format!("back_references key '{}' is not a relationship field", field),
                    ))
                }
            }
        }
        Ok(())
    }

    fn related(&self, model: &InferredModel, field: &str, target: &str) -> SchemaResult<&'a InferredModel> {
        self.models.get(target).ok_or_else(|| SchemaError::UndefinedBackReference {
            model: model.descriptor.name.clone(),
            field: field.to_string(),
            related: target.to_string(),
            message: "related model is not registered".to_string(),
        })
    }

    /// If the related model declares a back-reference for `remote_field`, it must name `field`
    fn check_reciprocal(
        &self,
        model: &InferredModel,
        field: &str,
        related: &InferredModel,
        remote_field: &str,
    ) -> SchemaResult<()> {
        match related.descriptor.options.back_references.get(remote_field) {
            Some(declared) if declared != field => Err(SchemaError::MismatchingBackReference {
                model: model.descriptor.name.clone(),
                related: related.descriptor.name.clone(),
                field: field.to_string(),
                back_reference: remote_field.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn resolve_foreign_key(&self, model: &InferredModel, field: &str, target: &str) -> SchemaResult<Resolution> {
        let name = &model.descriptor.name;
        let related = self.related(model, field, target)?;

        let Some(remote_field) = model.descriptor.options.back_references.get(field) else {
            let inverse = related
                .descriptor
                .options
                .back_references
                .iter()
                .find(|(remote, declared)| {
                    *declared == field
                        && related
                            .fields
                            .get(*remote)
                            .map_or(false, |kind| kind.is_collection_of(name))
                })
                .map(|(remote, _)| remote.clone());
            return Ok(Resolution::BelongsTo { inverse });
        };

        match related.fields.get(remote_field) {
            None => Err(undefined(model, field, target, remote_field)),
            Some(kind) if kind.is_collection_of(name) => {
                self.check_reciprocal(model, field, related, remote_field)?;
                Ok(Resolution::BelongsTo {
                    inverse: Some(remote_field.clone()),
                })
            }
            Some(kind) if kind.is_foreign_key_to(name) => {
                if name == target && remote_field == field {
                    return Err(SchemaError::configuration(
                        name,
                        format!("field '{}' cannot be its own one-to-one inverse", field),
                    ));
                }
                if related.descriptor.options.back_references.get(remote_field).map(String::as_str)
                    == Some(field)
                {
                    return Err(SchemaError::configuration(
                        name,
                        format!(
                            "one-to-one '{}.{}' <-> '{}.{}' is declared on both sides; \
                             declare the back-reference only on the side without the column",
                            name, field, target, remote_field
                        ),
                    ));
                }
                self.check_reciprocal(model, field, related, remote_field)?;
                self.check_column_free(model, field)?;
                Ok(Resolution::HasOne {
                    column: remote_field.clone(),
                })
            }
            Some(_) => Err(SchemaError::MismatchingBackReference {
                model: name.clone(),
                related: target.to_string(),
                field: field.to_string(),
                back_reference: remote_field.clone(),
            }),
        }
    }

    fn resolve_collection(&self, model: &InferredModel, field: &str, target: &str) -> SchemaResult<Resolution> {
        let name = &model.descriptor.name;
        let related = self.related(model, field, target)?;

        if let Some(remote_field) = model.descriptor.options.back_references.get(field) {
            return match related.fields.get(remote_field) {
                None => Err(undefined(model, field, target, remote_field)),
                Some(kind) if kind.is_foreign_key_to(name) => {
                    self.check_reciprocal(model, field, related, remote_field)?;
                    Ok(Resolution::HasMany {
                        column: remote_field.clone(),
                    })
                }
                Some(kind) if kind.is_collection_of(name) => {
                    if name == target && remote_field == field {
                        return Err(SchemaError::configuration(
                            name,
                            format!("many-to-many field '{}' cannot back-reference itself", field),
                        ));
                    }
                    self.check_reciprocal(model, field, related, remote_field)?;
                    Ok(Resolution::ManyToMany {
                        remote_field: remote_field.clone(),
                    })
                }
                Some(_) => Err(SchemaError::MismatchingBackReference {
                    model: name.clone(),
                    related: target.to_string(),
                    field: field.to_string(),
                    back_reference: remote_field.clone(),
                }),
            };
        }

        // Pairing declared only on the related side
        let candidates: Vec<(&String, &FieldKind)> = related
            .descriptor
            .options
            .back_references
            .iter()
            .filter(|(_, declared)| *declared == field)
            .filter_map(|(remote, _)| related.fields.get(remote).map(|kind| (remote, kind)))
            .filter(|(_, kind)| kind.is_foreign_key_to(name) || kind.is_collection_of(name))
            .collect();

        match candidates.as_slice() {
            [(remote, kind)] if kind.is_foreign_key_to(name) => Ok(Resolution::HasMany {
                column: (*remote).clone(),
            }),
            [(remote, _)] => Ok(Resolution::ManyToMany {
                remote_field: (*remote).clone(),
            }),
            [] => Err(SchemaError::UndefinedBackReference {
                model: name.clone(),
                field: field.to_string(),
                related: target.to_string(),
                message: "collection fields need a back_reference on this model or on the related model"
                    .to_string(),
            }),
            _ => Err(SchemaError::configuration(
                name,
                format!(
                    "collection '{}' is claimed by several fields of '{}'",
                    field, target
                ),
            )),
        }
    }

    /// A field that loses its column must not carry column options
    fn check_column_free(&self, model: &InferredModel, field: &str) -> SchemaResult<()> {
        let options = &model.descriptor.options;
        let constrained = options.pk == field
            || options.indexed.iter().any(|f| f == field)
            || options.unique.iter().any(|f| f == field)
            || options.unique_constraints.iter().flatten().any(|f| f == field);
        if constrained {
            return Err(SchemaError::configuration(
                &model.descriptor.name,
                format!("one-to-one inverse '{}' has no column to constrain", field),
            ));
        }
        Ok(())
    }

    fn junction_table(&self, pair: &Pair, qualified: bool) -> SchemaResult<JunctionTableDef> {
        let ((model_a, field_a), (model_b, field_b)) = pair;
        let a = &self.models[model_a];
        let b = &self.models[model_b];

        let name = if qualified {
            qualified_junction_table_name((&a.table.name, field_a), (&b.table.name, field_b))
        } else {
            junction_table_name(&a.table.name, &b.table.name)
        };

        let (left_name, right_name) = if a.table.name == b.table.name {
            (
                junction_column_name(field_a, &a.table.primary_key),
                junction_column_name(field_b, &b.table.primary_key),
            )
        } else {
            (
                junction_column_name(&a.table.name, &a.table.primary_key),
                junction_column_name(&b.table.name, &b.table.primary_key),
            )
        };

        if left_name == right_name {
            return Err(SchemaError::configuration(
                model_a,
                format!("junction '{}' would have two columns named '{}'", name, left_name),
            ));
        }

        let column = |column_name: String, model: &InferredModel| JunctionColumn {
            name: column_name,
            column_type: model.pk_type.column_type(),
            references: ColumnReference {
                table: model.table.name.clone(),
                column: model.table.primary_key.clone(),
            },
        };

        Ok(JunctionTableDef {
            name,
            left: column(left_name, a),
            right: column(right_name, b),
        })
    }
}

fn undefined(model: &InferredModel, field: &str, target: &str, remote_field: &str) -> SchemaError {
    SchemaError::UndefinedBackReference {
        model: model.descriptor.name.clone(),
        field: field.to_string(),
        related: target.to_string(),
        message: format!("'{}' has no field '{}'", target, remote_field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::{ModelDescriptor, ScalarType, TypeDecl};
    use crate::relationships::inference::SchemaInferenceEngine;

    fn resolve(descriptors: Vec<ModelDescriptor>) -> SchemaResult<ResolvedRelationships> {
        let declared: IndexMap<String, ModelDescriptor> =
            descriptors.into_iter().map(|d| (d.name.clone(), d)).collect();
        let engine = SchemaInferenceEngine::new(&declared);
        let inferred = declared
            .values()
            .map(|d| engine.infer_model(d).map(|m| (d.name.clone(), m)))
            .collect::<SchemaResult<IndexMap<_, _>>>()?;
        BackReferenceResolver::new(&inferred).resolve()
    }

    fn list(model: &str) -> TypeDecl {
        TypeDecl::list(TypeDecl::named(model))
    }

    #[test]
    fn test_one_to_many_pairing() {
        let resolved = resolve(vec![
            ModelDescriptor::new("Author")
                .field("id", ScalarType::Int64)
                .field("books", list("Book"))
                .back_reference("books", "author"),
            ModelDescriptor::new("Book")
                .field("id", ScalarType::Int64)
                .field("author", TypeDecl::named("Author")),
        ])
        .unwrap();

        let books = &resolved.relationships["Author"]["books"];
        assert_eq!(books.relationship_type, RelationshipType::HasMany);
        assert_eq!(books.foreign_key, ForeignKeyConfig::new("book", "author"));

        let author = &resolved.relationships["Book"]["author"];
        assert_eq!(author.relationship_type, RelationshipType::BelongsTo);
        assert_eq!(author.inverse.as_deref(), Some("books"));
        assert!(resolved.junctions.is_empty());
    }

    #[test]
    fn test_many_to_many_declared_on_one_side() {
        let resolved = resolve(vec![
            ModelDescriptor::new("Post")
                .field("id", ScalarType::Int64)
                .field("tags", list("Tag"))
                .back_reference("tags", "posts"),
            ModelDescriptor::new("Tag")
                .field("id", ScalarType::Int64)
                .field("posts", list("Post")),
        ])
        .unwrap();

        let junction = &resolved.junctions["post__tag"];
        assert_eq!(junction.left.name, "post_id");
        assert_eq!(junction.right.name, "tag_id");

        let tags = resolved.relationships["Post"]["tags"].pivot_config.clone().unwrap();
        assert_eq!((tags.local_key.as_str(), tags.foreign_key.as_str()), ("post_id", "tag_id"));

        let posts = resolved.relationships["Tag"]["posts"].pivot_config.clone().unwrap();
        assert_eq!((posts.local_key.as_str(), posts.foreign_key.as_str()), ("tag_id", "post_id"));
    }

    #[test]
    fn test_two_many_to_many_pairs_get_distinct_junctions() {
        let resolved = resolve(vec![
            ModelDescriptor::new("One")
                .field("id", ScalarType::Uuid)
                .field("links_a", list("Many"))
                .field("links_b", list("Many"))
                .back_reference("links_a", "owners_a")
                .back_reference("links_b", "owners_b"),
            ModelDescriptor::new("Many")
                .field("id", ScalarType::Uuid)
                .field("owners_a", list("One"))
                .field("owners_b", list("One")),
        ])
        .unwrap();

        let names: Vec<_> = resolved.junctions.keys().cloned().collect();
        assert_eq!(
            names,
            vec!["many__owners_a__one__links_a", "many__owners_b__one__links_b"]
        );
    }

    #[test]
    fn test_self_referential_many_to_many() {
        let resolved = resolve(vec![ModelDescriptor::new("User")
            .field("id", ScalarType::Int64)
            .field("followers", list("User"))
            .field("following", list("User"))
            .back_reference("followers", "following")])
        .unwrap();

        let junction = &resolved.junctions["user__user"];
        assert_eq!(junction.left.name, "followers_id");
        assert_eq!(junction.right.name, "following_id");

        let followers = resolved.relationships["User"]["followers"].pivot_config.clone().unwrap();
        assert_eq!(followers.local_key, "followers_id");
        let following = resolved.relationships["User"]["following"].pivot_config.clone().unwrap();
        assert_eq!(following.local_key, "following_id");
    }

    #[test]
    fn test_one_to_one_inverse() {
        let resolved = resolve(vec![
            ModelDescriptor::new("User")
                .field("id", ScalarType::Int64)
                .field("profile", TypeDecl::named("Profile").nullable())
                .back_reference("profile", "user"),
            ModelDescriptor::new("Profile")
                .field("id", ScalarType::Int64)
                .field("user", TypeDecl::named("User")),
        ])
        .unwrap();

        let profile = &resolved.relationships["User"]["profile"];
        assert_eq!(profile.relationship_type, RelationshipType::HasOne);
        assert_eq!(profile.foreign_key, ForeignKeyConfig::new("profile", "user"));
        assert_eq!(resolved.inverse_fields, vec![("User".to_string(), "profile".to_string())]);
        assert_eq!(
            resolved.relationships["Profile"]["user"].relationship_type,
            RelationshipType::BelongsTo
        );
    }

    #[test]
    fn test_collection_without_back_reference() {
        let error = resolve(vec![
            ModelDescriptor::new("Author")
                .field("id", ScalarType::Int64)
                .field("books", list("Book")),
            ModelDescriptor::new("Book")
                .field("id", ScalarType::Int64)
                .field("author", TypeDecl::named("Author")),
        ])
        .unwrap_err();
        assert!(matches!(error, SchemaError::UndefinedBackReference { .. }));
    }

    #[test]
    fn test_back_reference_to_missing_field() {
        let error = resolve(vec![
            ModelDescriptor::new("Author")
                .field("id", ScalarType::Int64)
                .field("books", list("Book"))
                .back_reference("books", "writer"),
            ModelDescriptor::new("Book")
                .field("id", ScalarType::Int64)
                .field("author", TypeDecl::named("Author")),
        ])
        .unwrap_err();
        match error {
            SchemaError::UndefinedBackReference { model, field, related, .. } => {
                assert_eq!((model.as_str(), field.as_str(), related.as_str()), ("Author", "books", "Book"));
            }
            other => panic!("Expected undefined back-reference, got {:?}", other),
        }
    }

    #[test]
    fn test_back_reference_to_wrong_kind() {
        let error = resolve(vec![
            ModelDescriptor::new("Author")
                .field("id", ScalarType::Int64)
                .field("books", list("Book"))
                .back_reference("books", "title"),
            ModelDescriptor::new("Book")
                .field("id", ScalarType::Int64)
                .field("title", ScalarType::Text),
        ])
        .unwrap_err();
        assert!(matches!(error, SchemaError::MismatchingBackReference { .. }));
    }

    #[test]
    fn test_scalar_back_reference_key_is_configuration_error() {
        let error = resolve(vec![ModelDescriptor::new("Author")
            .field("id", ScalarType::Int64)
            .field("name", ScalarType::Text)
            .back_reference("name", "id")])
        .unwrap_err();
        assert!(matches!(error, SchemaError::Configuration { .. }));
    }

    #[test]
    fn test_self_paired_collection_is_rejected() {
        let error = resolve(vec![ModelDescriptor::new("Node")
            .field("id", ScalarType::Int64)
            .field("peers", list("Node"))
            .back_reference("peers", "peers")])
        .unwrap_err();
        assert!(matches!(error, SchemaError::Configuration { .. }));
    }
}
