use tracing::debug;

use crate::fields::{FieldMapper, DESCRIPTION_FIELD, NAME_FIELD, UNITS_FIELD};
use crate::models::{AggregationData, Data, Metric, Model, Row, ViewData};

/// Turns views into models and metrics.
///
/// `translate_row` is the only required method. Override `translate_view` to
/// take over whole views, or `process` to rewrite data right before it is
/// bundled. Wrapping [`DefaultTranslator`] augments the built-in mapping
/// instead of replacing it.
pub trait Translator: Send + Sync {
    fn translate_view(&self, view: &ViewData) -> Data {
        let mut data = Data::default();
        for row in &view.rows {
            data.extend(self.translate_row(view, row));
        }
        data
    }

    fn translate_row(&self, view: &ViewData, row: &Row) -> Data;

    fn process(&self, data: Data) -> Data {
        data
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultTranslator {
    mapper: FieldMapper,
}

impl DefaultTranslator {
    pub fn new(mapper: FieldMapper) -> Self {
        Self { mapper }
    }
}

impl Translator for DefaultTranslator {
    fn translate_row(&self, view: &ViewData, row: &Row) -> Data {
        let mut data = Data::default();

        let Some(mapped) = self.mapper.map(&row.tags) else {
            debug!(
                view = %view.name,
                tags = ?row.tags,
                "ignoring row with no model dimension tags"
            );
            return data;
        };

        let timestamp = view.end.timestamp_millis();

        let mut model_metadata = mapped.metadata_fields.clone();
        model_metadata.insert(NAME_FIELD.to_string(), mapped.name());
        data.add_model(Model {
            timestamp,
            dimensions: mapped.dimensions.clone(),
            metadata_fields: model_metadata,
        });

        let mut metric_metadata = mapped.metadata_fields;
        if !view.description.is_empty() {
            metric_metadata.insert(DESCRIPTION_FIELD.to_string(), view.description.clone());
        }
        if !view.unit.is_empty() {
            metric_metadata.insert(UNITS_FIELD.to_string(), view.unit.clone());
        }

        let mut add_metric = |name: String, value: f64| {
            data.add_metric(Metric {
                metric: name,
                timestamp,
                value,
                dimensions: mapped.dimensions.clone(),
                metadata_fields: metric_metadata.clone(),
            });
        };

        match &row.data {
            AggregationData::Count(value) => add_metric(view.name.clone(), *value as f64),
            AggregationData::Sum(value) | AggregationData::LastValue(value) => {
                add_metric(view.name.clone(), *value)
            }
            AggregationData::Distribution(dist) => {
                let parts = [
                    ("count", dist.count as f64),
                    ("min", dist.min),
                    ("max", dist.max),
                    ("mean", dist.mean),
                    ("ss", dist.sum_of_squared_dev),
                ];
                for (suffix, value) in parts {
                    add_metric(format!("{}/{}", view.name, suffix), value);
                }
            }
            AggregationData::Unsupported { kind } => {
                debug!(view = %view.name, kind = %kind, "no metric mapping for aggregation");
            }
        }

        data
    }
}
