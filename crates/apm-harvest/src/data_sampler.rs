// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// A pluggable source of periodic data (CPU, memory, runtime statistics).
///
/// Samplers run only while a collector session is active: they are started
/// when the session connects and stopped when it is torn down.
pub trait DataSampler: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self);

    fn stop(&self);
}
