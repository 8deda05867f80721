use crate::config::ExporterConfig;
use crate::models::{Fields, Tag};

/// Metadata field naming the type of source that produced the data.
pub const SOURCE_TYPE_FIELD: &str = "source-type";

/// Model metadata field holding the entity's display name.
pub const NAME_FIELD: &str = "name";

/// Optional metric metadata field holding the view description.
pub const DESCRIPTION_FIELD: &str = "description";

/// Optional metric metadata field holding the measure's unit.
pub const UNITS_FIELD: &str = "units";

pub const K8S_CLUSTER_FIELD: &str = "k8s.cluster";
pub const K8S_NAMESPACE_FIELD: &str = "k8s.namespace";
pub const K8S_POD_FIELD: &str = "k8s.pod";

/// Model metadata field relating this entity to the one it impacts.
pub const IMPACT_FROM_DIMENSIONS_FIELD: &str = "impactFromDimensions";

/// Never derived by the mapper; recognised so callers can set it themselves.
pub const IMPACT_TO_DIMENSIONS_FIELD: &str = "impactToDimensions";

/// Dimensions, metadata and display name parts resolved from one row.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedFields {
    pub dimensions: Fields,
    pub metadata_fields: Fields,
    pub name_parts: Vec<String>,
}

impl MappedFields {
    pub fn name(&self) -> String {
        self.name_parts.join("/")
    }
}

/// Splits a row's tags into dimensions and metadata.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    dimension_tags: Vec<String>,
    global_dimensions: Fields,
    global_metadata_fields: Fields,
    source_type: String,
}

impl FieldMapper {
    pub fn new(
        dimension_tags: Vec<String>,
        global_dimensions: Fields,
        global_metadata_fields: Fields,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            dimension_tags,
            global_dimensions,
            global_metadata_fields,
            source_type: source_type.into(),
        }
    }

    pub fn from_config(config: &ExporterConfig) -> Self {
        Self::new(
            config.model_dimension_tags.clone(),
            config.global_dimensions.clone(),
            config.global_metadata_fields.clone(),
            config.source_type.clone(),
        )
    }

    /// Returns `None` when no tag matches a configured dimension: such rows
    /// cannot be attributed to an entity.
    pub fn map(&self, tags: &[Tag]) -> Option<MappedFields> {
        let mut dimensions = Fields::new();
        let mut name_parts = Vec::new();
        let mut metadata_fields = Fields::new();

        if !self.source_type.is_empty() {
            metadata_fields.insert(SOURCE_TYPE_FIELD.to_string(), self.source_type.clone());
        }

        // Name parts follow the configured order, not the row's tag order.
        for dimension_tag in &self.dimension_tags {
            if let Some(tag) = tags.iter().find(|t| &t.key == dimension_tag) {
                dimensions.insert(dimension_tag.clone(), tag.value.clone());
                name_parts.push(tag.value.clone());
            }
        }

        if name_parts.is_empty() {
            return None;
        }

        for tag in tags {
            if !dimensions.contains_key(&tag.key) {
                metadata_fields.insert(tag.key.clone(), tag.value.clone());
            }
        }

        add_kubernetes_impacts(&mut metadata_fields);

        for (k, v) in &self.global_dimensions {
            dimensions.insert(k.clone(), v.clone());
        }

        for (k, v) in &self.global_metadata_fields {
            metadata_fields.insert(k.clone(), v.clone());
        }

        Some(MappedFields {
            dimensions,
            metadata_fields,
            name_parts,
        })
    }
}

/// Adds an outbound impact relation when cluster, namespace and pod are all
/// known. Only the "from" side is ever derived.
pub fn add_kubernetes_impacts(metadata_fields: &mut Fields) {
    let lookup = |field: &str| {
        metadata_fields
            .get(field)
            .filter(|v| !v.is_empty())
            .cloned()
    };

    let (Some(cluster), Some(namespace), Some(pod)) = (
        lookup(K8S_CLUSTER_FIELD),
        lookup(K8S_NAMESPACE_FIELD),
        lookup(K8S_POD_FIELD),
    ) else {
        return;
    };

    metadata_fields.insert(
        IMPACT_FROM_DIMENSIONS_FIELD.to_string(),
        format!(
            "{}={},{}={},{}={}",
            K8S_CLUSTER_FIELD, cluster, K8S_NAMESPACE_FIELD, namespace, K8S_POD_FIELD, pod
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn mapper(dimension_tags: &[&str]) -> FieldMapper {
        FieldMapper::new(
            dimension_tags.iter().map(|s| s.to_string()).collect(),
            Fields::new(),
            Fields::new(),
            "test/source",
        )
    }

    #[test]
    fn test_name_follows_configured_order() {
        let mapper = mapper(&["service", "host"]);
        let forward = vec![Tag::new("service", "api"), Tag::new("host", "web-1")];
        let reversed = vec![Tag::new("host", "web-1"), Tag::new("service", "api")];

        let a = mapper.map(&forward).unwrap();
        let b = mapper.map(&reversed).unwrap();

        assert_eq!(a.name(), "api/web-1");
        assert_eq!(b.name(), "api/web-1");
        assert_eq!(a.dimensions, fields(&[("host", "web-1"), ("service", "api")]));
    }

    #[test]
    fn test_row_without_dimension_tags_is_rejected() {
        let mapper = mapper(&["service"]);
        assert!(mapper.map(&[Tag::new("region", "eu")]).is_none());
        assert!(mapper.map(&[]).is_none());
    }

    #[test]
    fn test_first_matching_tag_wins() {
        let mapper = mapper(&["service"]);
        let tags = vec![Tag::new("service", "first"), Tag::new("service", "second")];
        let mapped = mapper.map(&tags).unwrap();

        assert_eq!(mapped.name_parts, vec!["first".to_string()]);
        assert!(!mapped.metadata_fields.contains_key("service"));
    }

    #[test]
    fn test_non_dimension_tags_become_metadata() {
        let mapper = mapper(&["service"]);
        let tags = vec![Tag::new("service", "api"), Tag::new("region", "eu")];
        let mapped = mapper.map(&tags).unwrap();

        assert_eq!(
            mapped.metadata_fields,
            fields(&[("region", "eu"), (SOURCE_TYPE_FIELD, "test/source")])
        );
    }

    #[test]
    fn test_globals_override_row_values() {
        let mapper = FieldMapper::new(
            vec!["service".to_string()],
            fields(&[("source", "cluster-a"), ("service", "global")]),
            fields(&[("region", "us"), (SOURCE_TYPE_FIELD, "custom")]),
            "test/source",
        );
        let tags = vec![Tag::new("service", "api"), Tag::new("region", "eu")];
        let mapped = mapper.map(&tags).unwrap();

        assert_eq!(
            mapped.dimensions,
            fields(&[("service", "global"), ("source", "cluster-a")])
        );
        assert_eq!(mapped.metadata_fields["region"], "us");
        assert_eq!(mapped.metadata_fields[SOURCE_TYPE_FIELD], "custom");
        // The name is resolved from the row before globals apply.
        assert_eq!(mapped.name(), "api");
    }

    #[test]
    fn test_kubernetes_impacts() {
        let mut metadata = fields(&[
            (K8S_CLUSTER_FIELD, "prod"),
            (K8S_NAMESPACE_FIELD, "default"),
            (K8S_POD_FIELD, "api-0"),
        ]);
        add_kubernetes_impacts(&mut metadata);

        assert_eq!(
            metadata[IMPACT_FROM_DIMENSIONS_FIELD],
            "k8s.cluster=prod,k8s.namespace=default,k8s.pod=api-0"
        );
        assert!(!metadata.contains_key(IMPACT_TO_DIMENSIONS_FIELD));
    }

    #[test]
    fn test_kubernetes_impacts_need_all_fields() {
        let mut metadata = fields(&[
            (K8S_CLUSTER_FIELD, "prod"),
            (K8S_NAMESPACE_FIELD, ""),
            (K8S_POD_FIELD, "api-0"),
        ]);
        add_kubernetes_impacts(&mut metadata);
        assert!(!metadata.contains_key(IMPACT_FROM_DIMENSIONS_FIELD));

        let mut metadata = fields(&[(K8S_CLUSTER_FIELD, "prod"), (K8S_POD_FIELD, "api-0")]);
        add_kubernetes_impacts(&mut metadata);
        assert!(!metadata.contains_key(IMPACT_FROM_DIMENSIONS_FIELD));
    }
}
