//! Index schema definition for chunk documents.

use serde::{Deserialize, Serialize};

/// Name of the key field.
pub const KEY_FIELD: &str = "chunk_id";
/// Name of the vector field.
pub const VECTOR_FIELD: &str = "embedding";
/// Name of the vector search profile bound to [`VECTOR_FIELD`].
pub const VECTOR_PROFILE: &str = "vector-profile";
/// Name of the HNSW algorithm configuration.
pub const HNSW_ALGORITHM: &str = "hnsw";
/// Name of the semantic configuration.
pub const SEMANTIC_CONFIGURATION: &str = "default";
/// Analyzer applied to the full-text field.
pub const TEXT_ANALYZER: &str = "en.lucene";

/// Index definition in the search service's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Field definitions.
    pub fields: Vec<FieldSpec>,
    /// Vector search algorithms and profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearch>,
    /// Semantic ranking configurations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSettings>,
}

/// One field of the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// EDM type (`Edm.String`, `Edm.Int32`, `Collection(Edm.Single)`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the field is the document key.
    pub key: bool,
    /// Whether the field takes part in full-text search.
    pub searchable: bool,
    /// Whether the field can be used in filters.
    pub filterable: bool,
    /// Whether facet counts can be computed on the field.
    pub facetable: bool,
    /// Whether results can be sorted on the field.
    pub sortable: bool,
    /// Whether the field is returned in results.
    pub retrievable: bool,
    /// Analyzer for searchable text fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    /// Vector dimensionality for vector fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    /// Vector profile for vector fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
}

/// Vector search section of the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearch {
    /// Algorithm configurations.
    pub algorithms: Vec<VectorAlgorithm>,
    /// Profiles binding fields to algorithms.
    pub profiles: Vec<VectorProfile>,
}

/// Named approximate nearest-neighbour algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorAlgorithm {
    /// Configuration name.
    pub name: String,
    /// Algorithm kind.
    pub kind: String,
}

/// Named vector profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorProfile {
    /// Profile name.
    pub name: String,
    /// Algorithm configuration name.
    pub algorithm: String,
}

/// Semantic ranking section of the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticSettings {
    /// Named semantic configurations.
    pub configurations: Vec<SemanticConfiguration>,
}

/// Semantic configuration prioritizing content fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConfiguration {
    /// Configuration name.
    pub name: String,
    /// Fields the reranker reads.
    pub prioritized_fields: PrioritizedFields,
}

/// Prioritized fields of a semantic configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrioritizedFields {
    /// Content fields, most important first.
    pub prioritized_content_fields: Vec<SemanticField>,
}

/// Reference to a field inside a semantic configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticField {
    /// Referenced field name.
    pub field_name: String,
}

impl IndexSchema {
    /// Schema for periodical chunk documents with a vector field of `dimension` components.
    pub fn for_chunks(name: &str, dimension: usize) -> Self {
        let fields = vec![
            FieldSpec {
                key: true,
                filterable: true,
                ..FieldSpec::simple(KEY_FIELD, "Edm.String")
            },
            FieldSpec {
                filterable: true,
                facetable: true,
                ..FieldSpec::simple("document_id", "Edm.String")
            },
            FieldSpec {
                filterable: true,
                facetable: true,
                ..FieldSpec::simple("year", "Edm.Int32")
            },
            FieldSpec {
                filterable: true,
                facetable: true,
                ..FieldSpec::simple("month", "Edm.Int32")
            },
            FieldSpec {
                filterable: true,
                ..FieldSpec::simple("page_start", "Edm.Int32")
            },
            FieldSpec {
                filterable: true,
                ..FieldSpec::simple("page_end", "Edm.Int32")
            },
            FieldSpec {
                searchable: true,
                analyzer: Some(TEXT_ANALYZER.into()),
                ..FieldSpec::simple("text", "Edm.String")
            },
            FieldSpec::simple("source_locator", "Edm.String"),
            FieldSpec {
                searchable: true,
                retrievable: false,
                dimensions: Some(dimension),
                vector_search_profile: Some(VECTOR_PROFILE.into()),
                ..FieldSpec::simple(VECTOR_FIELD, "Collection(Edm.Single)")
            },
        ];

        Self {
            name: name.to_string(),
            fields,
            vector_search: Some(VectorSearch {
                algorithms: vec![VectorAlgorithm {
                    name: HNSW_ALGORITHM.into(),
                    kind: "hnsw".into(),
                }],
                profiles: vec![VectorProfile {
                    name: VECTOR_PROFILE.into(),
                    algorithm: HNSW_ALGORITHM.into(),
                }],
            }),
            semantic: Some(SemanticSettings {
                configurations: vec![SemanticConfiguration {
                    name: SEMANTIC_CONFIGURATION.into(),
                    prioritized_fields: PrioritizedFields {
                        prioritized_content_fields: vec![SemanticField {
                            field_name: "text".into(),
                        }],
                    },
                }],
            }),
        }
    }

    /// Dimensionality of the vector field, if the schema has one.
    pub fn vector_dimension(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|field| field.name == VECTOR_FIELD)
            .and_then(|field| field.dimensions)
    }
}

impl FieldSpec {
    fn simple(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            retrievable: true,
            ..Self::default()
        }
    }
}
