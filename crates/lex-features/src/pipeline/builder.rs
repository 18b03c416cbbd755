//! Main feature pipeline.
//!
//! This module provides the `Pipeline` struct and its builder. A pipeline
//! runs its stages in order, handing each one the previous stage's output
//! and a shared role registry.

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::config::{PipelineSpec, StageConfig};
use crate::error::{Degradation, Result, ResultExt};
use crate::roles::{ColumnRole, RoleRegistry};
use crate::stages::{
    ChiSquareStage, ConstantColumnStage, CorrelationStage, FrequencyMergeStage, ImportanceStage,
    ImputeStage, LabelEncodingStage, OneHotStage, OutlierStage, ScalingStage, Stage,
    TargetMergeStage, TimeSeriesStage,
};

/// A sequence of fit/transform stages.
///
/// Use [`Pipeline::builder()`] to assemble stages by hand or
/// [`Pipeline::from_spec`] to build one from a JSON [`PipelineSpec`].
///
/// # Example
///
/// ```rust,ignore
/// use lex_features::{ImputeConfig, ImputeStage, LabelEncodingStage, Pipeline};
///
/// let mut pipeline = Pipeline::builder()
///     .numeric(["age", "fare"])
///     .categorical(["city"])
///     .stage(ImputeStage::new(ImputeConfig::default())?)
///     .stage(LabelEncodingStage::new())
///     .build();
///
/// let train = pipeline.fit_transform(train_df, Some(&y))?;
/// let test = pipeline.transform(test_df, None)?;
/// ```
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    /// Roles as declared by the caller.
    declared: RoleRegistry,
    /// Roles after the last fit or transform, including synthesized columns.
    roles: RoleRegistry,
}

// Pipelines are fitted on one thread and may be handed to another.
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Build every stage named in `spec`, validating its configuration.
    pub fn from_spec(spec: &PipelineSpec) -> Result<Self> {
        spec.validate()?;
        let mut builder = Pipeline::builder().roles(spec.roles());

        for entry in &spec.stages {
            let stage: Box<dyn Stage> = match entry {
                StageConfig::Impute(c) => Box::new(ImputeStage::new(c.clone())?),
                StageConfig::Outliers(c) => Box::new(OutlierStage::new(c.clone())?),
                StageConfig::FrequencyMerge(c) => Box::new(FrequencyMergeStage::new(c.clone())?),
                StageConfig::TargetMerge(c) => Box::new(TargetMergeStage::new(c.clone())?),
                StageConfig::ConstantColumns => Box::new(ConstantColumnStage::new()),
                StageConfig::Correlation(c) => Box::new(CorrelationStage::new(c.clone())?),
                StageConfig::ChiSquare(c) => Box::new(ChiSquareStage::new(c.clone())?),
                StageConfig::Importance(c) => Box::new(ImportanceStage::new(c.clone())?),
                StageConfig::LabelEncoding => Box::new(LabelEncodingStage::new()),
                StageConfig::OneHot(c) => Box::new(OneHotStage::new(c.clone())),
                StageConfig::Scaling => Box::new(ScalingStage::new()),
                StageConfig::TimeSeries(c) => Box::new(TimeSeriesStage::new(c.clone())?),
            };
            builder = builder.boxed_stage(stage);
        }

        Ok(builder.build())
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Roles seen by the last call, including synthesized indicator columns.
    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Fit every stage, feeding each the previous stage's transformed output.
    pub fn fit(&mut self, x: DataFrame, y: Option<&Series>) -> Result<()> {
        self.fit_transform(x, y).map(|_| ())
    }

    pub fn fit_transform(&mut self, x: DataFrame, y: Option<&Series>) -> Result<DataFrame> {
        info!(
            "Fitting pipeline: {} stages on {:?}",
            self.stages.len(),
            x.shape()
        );
        self.run(x, y, true)
    }

    /// Apply every fitted stage in order.
    pub fn transform(&mut self, x: DataFrame, y: Option<&Series>) -> Result<DataFrame> {
        info!("Transforming {:?}", x.shape());
        self.run(x, y, false)
    }

    fn run(&mut self, mut x: DataFrame, y: Option<&Series>, fit: bool) -> Result<DataFrame> {
        let mut roles = self.declared.clone();

        for stage in &mut self.stages {
            let name = stage.name();
            let result = if fit {
                stage.fit_transform(x, y, &mut roles)
            } else {
                stage.transform(x, y, &mut roles)
            };
            x = match result.context(format!("Stage '{}'", name)) {
                Ok(out) => out,
                Err(e) => {
                    error!("Pipeline error: {}", e);
                    return Err(e);
                }
            };
            debug!("Stage '{}' done: {:?}", name, x.shape());
        }

        self.roles = roles;
        Ok(x)
    }

    /// Fallbacks recorded by every stage during the last call.
    pub fn degradations(&self) -> Vec<Degradation> {
        self.stages
            .iter()
            .flat_map(|s| s.degradations().iter().cloned())
            .collect()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    roles: RoleRegistry,
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    /// Replace the declared roles.
    pub fn roles(mut self, roles: RoleRegistry) -> Self {
        self.roles = roles;
        self
    }

    pub fn numeric<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for c in columns {
            self.roles.register(c, ColumnRole::Numeric);
        }
        self
    }

    pub fn categorical<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for c in columns {
            self.roles.register(c, ColumnRole::Categorical);
        }
        self
    }

    pub fn target(mut self, column: impl Into<String>) -> Self {
        self.roles.register(column, ColumnRole::Target);
        self
    }

    /// Append a stage.
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.boxed_stage(Box::new(stage))
    }

    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            roles: self.roles.clone(),
            declared: self.roles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImputeConfig, OutlierConfig, OutlierMethod};
    use crate::frame::column_names;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_registers_roles() {
        let pipeline = Pipeline::builder()
            .numeric(["age"])
            .categorical(["city"])
            .target("survived")
            .stage(LabelEncodingStage::new())
            .build();

        assert_eq!(pipeline.roles().role("age"), Some(ColumnRole::Numeric));
        assert_eq!(pipeline.roles().target(), Some("survived"));
        assert_eq!(pipeline.stage_names(), vec!["label_encoding"]);
    }

    #[test]
    fn test_indicator_columns_reach_later_stages() {
        let df = df![
            "age" => [Some(10.0), None, Some(30.0)],
            "city" => ["a", "b", "a"],
        ]
        .unwrap();
        let mut pipeline = Pipeline::builder()
            .numeric(["age"])
            .categorical(["city"])
            .stage(ImputeStage::new(ImputeConfig::default()).unwrap())
            .stage(LabelEncodingStage::new())
            .build();

        let out = pipeline.fit_transform(df, None).unwrap();
        assert_eq!(column_names(&out), vec!["age", "city", "age_was_missing"]);
        assert_eq!(
            pipeline.roles().role("age_was_missing"),
            Some(ColumnRole::Categorical)
        );
        // the indicator was label-encoded as a categorical column
        assert_eq!(out.column("age_was_missing").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_from_spec_builds_stages_in_order() {
        let spec = PipelineSpec::from_json(
            r#"{
                "numeric": ["n"],
                "categorical": ["c"],
                "stages": [
                    {"stage": "impute", "strategy": "zero"},
                    {"stage": "frequency_merge", "threshold": 0.9},
                    {"stage": "one_hot"},
                    {"stage": "scaling"}
                ]
            }"#,
        )
        .unwrap();
        let pipeline = Pipeline::from_spec(&spec).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["impute", "frequency_merge", "one_hot", "scaling"]
        );
    }

    #[test]
    fn test_from_spec_rejects_invalid_config() {
        let spec = PipelineSpec::from_json(
            r#"{"stages": [{"stage": "correlation", "threshold": 1.5}]}"#,
        )
        .unwrap();
        let err = Pipeline::from_spec(&spec).err().unwrap();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_stage_error_carries_stage_name() {
        let mut pipeline = Pipeline::builder()
            .stage(ScalingStage::new())
            .build();
        let err = pipeline.transform(df!["a" => [1.0]].unwrap(), None).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FITTED");
        assert!(err.to_string().contains("scaling"));
    }

    #[test]
    fn test_degradations_collected() {
        let df = df!["x" => [1.0, 2.0, 3.0]].unwrap();
        let mut pipeline = Pipeline::builder()
            .numeric(["x"])
            .stage(
                OutlierStage::new(OutlierConfig {
                    method: OutlierMethod::Density,
                    ..Default::default()
                })
                .unwrap(),
            )
            .build();
        pipeline.fit_transform(df, None).unwrap();

        let degradations = pipeline.degradations();
        assert_eq!(degradations.len(), 1);
        assert_eq!(degradations[0].stage, "outliers");
        assert_eq!(degradations[0].column.as_deref(), Some("x"));
    }
}
