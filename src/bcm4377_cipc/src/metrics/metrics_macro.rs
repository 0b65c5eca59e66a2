/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Once;

/// Static metadata for one metric, plus the guard that makes sure it is
/// described to the recorder only once.
pub(crate) struct MetricInfo {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) unit: metrics::Unit,
    described: Once,
}

impl MetricInfo {
    pub(crate) const fn new(
        name: &'static str,
        description: &'static str,
        unit: metrics::Unit,
    ) -> Self {
        Self {
            name,
            description,
            unit,
            described: Once::new(),
        }
    }

    pub(crate) fn describe_counter(&'static self) {
        self.described.call_once(|| {
            metrics::describe_counter!(self.name, self.unit, self.description);
        });
    }

    pub(crate) fn describe_histogram(&'static self) {
        self.described.call_once(|| {
            metrics::describe_histogram!(self.name, self.unit, self.description);
        });
    }
}

/// Declares metric enums. Each variant holds its label values and maps to a
/// `MetricInfo` returned by the generated `info()`.
macro_rules! define_metrics {
    (
        $(
            $metric_type:ident {
                $(
                    $variant:ident { $($field_name:ident : $field_ty:ty),* $(,)? } => {
                        name: $name:literal,
                        description: $description:literal,
                        unit: $unit:ident $(,)?
                    }
                ),* $(,)?
            }
        )*
    ) => {
        $(
            #[derive(Debug, Clone)]
            pub(crate) enum $metric_type {
                $( $variant { $($field_name : $field_ty),* } ),*
            }

            impl $metric_type {
                pub(crate) fn info(&self) -> &'static $crate::metrics::metrics_macro::MetricInfo {
                    use $crate::metrics::metrics_macro::MetricInfo;
                    match self {
                        $(
                            Self::$variant { .. } => {
                                static INFO: MetricInfo =
                                    MetricInfo::new($name, $description, metrics::Unit::$unit);
                                &INFO
                            }
                        )*
                    }
                }
            }
        )*
    };
}
