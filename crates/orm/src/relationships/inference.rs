//! Schema Inference - Field classification and table derivation
//!
//! Runs once per model during initialization, after every model has been
//! declared. Each declared type is classified as a scalar column, a foreign
//! key column or a collection, and the model's physical table is derived from
//! the classification. Pairing collections with their counterparts happens
//! later in the back-reference pass.

use indexmap::IndexMap;

use super::metadata::{ColumnDef, ColumnReference, FieldKind, TableDef};
use crate::error::{SchemaError, SchemaResult};
use crate::model::descriptor::{FieldDescriptor, ModelDescriptor, ScalarType, TypeDecl};
use crate::naming::to_snake_case;

/// A model after field classification, before back-references are resolved
#[derive(Debug, Clone, PartialEq)]
pub struct InferredModel {
    pub descriptor: ModelDescriptor,
    pub table: TableDef,
    pub pk_type: ScalarType,
    pub fields: IndexMap<String, FieldKind>,
}

/// One resolved member of a declared type
#[derive(Debug, Clone, PartialEq)]
enum Member {
    Model(String),
    Scalar(ScalarType),
    List(TypeDecl),
}

/// Table name for a model: explicit option or the snake-cased model name
pub fn table_name(descriptor: &ModelDescriptor) -> String {
    descriptor
        .options
        .tablename
        .clone()
        .unwrap_or_else(|| to_snake_case(&descriptor.name))
}

/// Check a declaration on its own, before other models are known
pub fn validate_declaration(descriptor: &ModelDescriptor) -> SchemaResult<()> {
    let model = descriptor.name.as_str();
    if model.trim().is_empty() {
        return Err(SchemaError::configuration(model, "model name must not be empty"));
    }
    // `__` separates the sides of a junction table name
    if model.contains("__") {
        return Err(SchemaError::configuration(model, "model name must not contain '__'"));
    }

    let mut seen = std::collections::HashSet::new();
    for field in &descriptor.fields {
        if field.name.trim().is_empty() {
            return Err(SchemaError::configuration(model, "field names must not be empty"));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::configuration(
                model,
                format!("field '{}' is declared twice", field.name),
            ));
        }
    }

    let options = &descriptor.options;
    let pk = descriptor.get_field(&options.pk).ok_or_else(|| {
        SchemaError::configuration(model, format!("primary key '{}' is not a declared field", options.pk))
    })?;
    scalar_of(&pk.ty).ok_or_else(|| {
        SchemaError::configuration(
            model,
            format!(
                "primary key '{}' must be a non-null scalar, found '{}'",
                pk.name,
                pk.ty.describe()
            ),
        )
    })?;

    let table = table_name(descriptor);
    if table.trim().is_empty() || table.contains("__") {
        return Err(SchemaError::configuration(model, format!("invalid table name '{}'", table)));
    }

    let option_fields = options
        .indexed
        .iter()
        .map(|f| ("indexed", f))
        .chain(options.unique.iter().map(|f| ("unique", f)))
        .chain(
            options
                .unique_constraints
                .iter()
                .flatten()
                .map(|f| ("unique_constraints", f)),
        )
        .chain(options.back_references.keys().map(|f| ("back_references", f)));

    for (option, field) in option_fields {
        if !descriptor.has_field(field) {
            return Err(SchemaError::configuration(
                model,
                format!("{} names unknown field '{}'", option, field),
            ));
        }
    }

    Ok(())
}

fn scalar_of(ty: &TypeDecl) -> Option<ScalarType> {
    match ty {
        TypeDecl::Scalar(scalar) => Some(*scalar),
        TypeDecl::Named(name) => ScalarType::from_name(name),
        _ => None,
    }
}

/// Classifies fields of every declared model
pub struct SchemaInferenceEngine<'a> {
    models: &'a IndexMap<String, ModelDescriptor>,
}

impl<'a> SchemaInferenceEngine<'a> {
    pub fn new(models: &'a IndexMap<String, ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Classify all fields of one model and derive its table
    pub fn infer_model(&self, descriptor: &ModelDescriptor) -> SchemaResult<InferredModel> {
        let pk_type = self.pk_type(&descriptor.name)?;

        let mut fields = IndexMap::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            let kind = self.classify_field(descriptor, field)?;
            tracing::trace!(model = %descriptor.name, field = %field.name, ?kind, "classified field");
            fields.insert(field.name.clone(), kind);
        }

        let table = self.build_table(descriptor, &fields)?;
        Ok(InferredModel {
            descriptor: descriptor.clone(),
            table,
            pk_type,
            fields,
        })
    }

    /// Primary key scalar type of a declared model
    pub fn pk_type(&self, model: &str) -> SchemaResult<ScalarType> {
        let descriptor = self
            .models
            .get(model)
            .ok_or_else(|| SchemaError::configuration(model, "model is not registered"))?;
        descriptor
            .get_field(&descriptor.options.pk)
            .and_then(|field| scalar_of(&field.ty))
            .ok_or_else(|| {
                SchemaError::configuration(
                    model,
                    format!("primary key '{}' must be a non-null scalar", descriptor.options.pk),
                )
            })
    }

    pub fn classify_field(&self, descriptor: &ModelDescriptor, field: &FieldDescriptor) -> SchemaResult<FieldKind> {
        let mut nullable = false;
        let mut members = Vec::new();
        flatten(&field.ty, &mut members, &mut nullable);

        if let [TypeDecl::List(inner)] = members.as_slice() {
            return self.classify_list(descriptor, field, inner, nullable);
        }

        let resolved = members
            .iter()
            .map(|member| self.resolve_member(descriptor, field, member))
            .collect::<SchemaResult<Vec<_>>>()?;

        if resolved.iter().any(|member| matches!(member, Member::List(_))) {
            return Err(type_conversion(descriptor, field));
        }

        let (models, scalars) = split(resolved);
        match models.as_slice() {
            [] => match scalars.as_slice() {
                [ty] => Ok(FieldKind::Scalar { ty: *ty, nullable }),
                _ => Err(type_conversion(descriptor, field)),
            },
            [target] => {
                let key_type = self.pk_type(target)?;
                if let Some(other) = scalars.iter().find(|scalar| **scalar != key_type) {
                    return Err(SchemaError::MustUnionForeignKey {
                        model: descriptor.name.clone(),
                        field: field.name.clone(),
                        related: target.clone(),
                        pk_type: key_type.name().to_string(),
                        reason: format!(
                            "'{}' is not the primary key type of '{}'",
                            other.name(),
                            target
                        ),
                    });
                }
                Ok(FieldKind::ForeignKey {
                    target: target.clone(),
                    nullable,
                    key_type,
                })
            }
            [first, ..] => Err(SchemaError::MustUnionForeignKey {
                model: descriptor.name.clone(),
                field: field.name.clone(),
                related: first.clone(),
                pk_type: self.pk_type(first)?.name().to_string(),
                reason: format!("union of models {} is ambiguous", models.join(", ")),
            }),
        }
    }

    fn classify_list(
        &self,
        descriptor: &ModelDescriptor,
        field: &FieldDescriptor,
        inner: &TypeDecl,
        nullable: bool,
    ) -> SchemaResult<FieldKind> {
        let mut element_nullable = false;
        let mut members = Vec::new();
        flatten(inner, &mut members, &mut element_nullable);

        let resolved = members
            .iter()
            .map(|member| self.resolve_member(descriptor, field, member))
            .collect::<SchemaResult<Vec<_>>>()?;

        let nested_list = resolved.iter().any(|member| matches!(member, Member::List(_)));
        let (models, scalars) = split(resolved);

        match models.as_slice() {
            [] if nested_list || !scalars.is_empty() => Ok(FieldKind::Scalar {
                ty: ScalarType::Json,
                nullable,
            }),
            [] => Err(type_conversion(descriptor, field)),
            [target] if !nested_list => {
                let key_type = self.pk_type(target)?;
                if let Some(other) = scalars.iter().find(|scalar| **scalar != key_type) {
                    return Err(SchemaError::MustUnionForeignKey {
                        model: descriptor.name.clone(),
                        field: field.name.clone(),
                        related: target.clone(),
                        pk_type: key_type.name().to_string(),
                        reason: format!("collection mixes '{}' with '{}'", target, other.name()),
                    });
                }
                Ok(FieldKind::Collection {
                    target: target.clone(),
                })
            }
            [target, ..] => Err(SchemaError::MustUnionForeignKey {
                model: descriptor.name.clone(),
                field: field.name.clone(),
                related: target.clone(),
                pk_type: self.pk_type(target)?.name().to_string(),
                reason: format!("collection over models {} is ambiguous", models.join(", ")),
            }),
        }
    }

    fn resolve_member(
        &self,
        descriptor: &ModelDescriptor,
        field: &FieldDescriptor,
        member: &TypeDecl,
    ) -> SchemaResult<Member> {
        match member {
            TypeDecl::Scalar(scalar) => Ok(Member::Scalar(*scalar)),
            TypeDecl::Named(name) if self.models.contains_key(name) => Ok(Member::Model(name.clone())),
            TypeDecl::Named(name) => ScalarType::from_name(name)
                .map(Member::Scalar)
                .ok_or_else(|| SchemaError::TypeConversion {
                    model: descriptor.name.clone(),
                    field: field.name.clone(),
                    type_name: name.clone(),
                }),
            TypeDecl::List(inner) => Ok(Member::List((**inner).clone())),
            TypeDecl::Optional(_) | TypeDecl::Union(_) => Err(type_conversion(descriptor, field)),
        }
    }

    fn build_table(&self, descriptor: &ModelDescriptor, fields: &IndexMap<String, FieldKind>) -> SchemaResult<TableDef> {
        let options = &descriptor.options;
        let mut columns = Vec::new();

        for (name, kind) in fields {
            let mut column = match kind {
                FieldKind::Scalar { ty, nullable } => {
                    let mut column = ColumnDef::new(name.clone(), ty.column_type());
                    column.nullable = *nullable;
                    column
                }
                FieldKind::ForeignKey { target, nullable, key_type } => {
                    let related = self
                        .models
                        .get(target)
                        .ok_or_else(|| SchemaError::configuration(target, "model is not registered"))?;
                    let mut column = ColumnDef::new(name.clone(), key_type.column_type());
                    column.nullable = *nullable;
                    column.references = Some(ColumnReference {
                        table: table_name(related),
                        column: related.options.pk.clone(),
                    });
                    column
                }
                FieldKind::Collection { .. } | FieldKind::Inverse { .. } => {
                    let constrained = options.indexed.contains(name)
                        || options.unique.contains(name)
                        || options.unique_constraints.iter().flatten().any(|f| f == name);
                    if constrained {
                        return Err(SchemaError::configuration(
                            &descriptor.name,
                            format!("collection field '{}' has no column to index", name),
                        ));
                    }
                    continue;
                }
            };

            column.primary_key = *name == options.pk;
            if column.primary_key {
                column.nullable = false;
            }
            column.unique = options.unique.contains(name);
            column.indexed = options.indexed.contains(name);
            columns.push(column);
        }

        Ok(TableDef {
            name: table_name(descriptor),
            primary_key: options.pk.clone(),
            columns,
            unique_constraints: options.unique_constraints.clone(),
        })
    }
}

/// Flatten optionals and unions into their members
fn flatten(ty: &TypeDecl, members: &mut Vec<TypeDecl>, nullable: &mut bool) {
    match ty {
        TypeDecl::Optional(inner) => {
            *nullable = true;
            flatten(inner, members, nullable);
        }
        TypeDecl::Union(items) => {
            for item in items {
                flatten(item, members, nullable);
            }
        }
        other => {
            if !members.contains(other) {
                members.push(other.clone());
            }
        }
    }
}

fn split(members: Vec<Member>) -> (Vec<String>, Vec<ScalarType>) {
    let mut models = Vec::new();
    let mut scalars = Vec::new();
    for member in members {
        match member {
            Member::Model(name) if !models.contains(&name) => models.push(name),
            Member::Scalar(scalar) if !scalars.contains(&scalar) => scalars.push(scalar),
            _ => {}
        }
    }
    (models, scalars)
}

fn type_conversion(descriptor: &ModelDescriptor, field: &FieldDescriptor) -> SchemaError {
    SchemaError::TypeConversion {
        model: descriptor.name.clone(),
        field: field.name.clone(),
        type_name: field.ty.describe(),
    }
}
