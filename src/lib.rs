/*
Copyright 2025 Connor Nolan

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

pub mod arch;
pub mod bytecode;
pub mod bytes;
pub mod errors;
pub mod expr;
pub mod floatnum;
mod interval_tree;
pub mod intnum;
pub mod location;
pub mod numeric_output;
pub mod object;
pub mod optimizer;
pub mod reloc;
pub mod section;
pub mod symbol;
pub mod value;

use anyhow::{Context, Result};

use errors::{AssemblyError, Diagnostic, Diagnostics, Severity};
use object::{Object, ObjectOutput};

fn phase_result(diags: &Diagnostics) -> std::result::Result<(), AssemblyError> {
    if !diags.has_error_occurred() {
        return Ok(());
    }
    let first = diags.errors().next().expect("error reported");
    if first.source.is_valid() {
        Err(AssemblyError::SemanticError {
            line: first.source.line as usize,
            reason: first.id.to_string(),
        })
    } else {
        Err(AssemblyError::SemanticErrorNoLine {
            reason: first.id.to_string(),
        })
    }
}

/// Runs the full pipeline over a populated object: value finalization,
/// span optimization, then byte output with relocation emission. A
/// phase that reports an error stops the pipeline after completing, so
/// every error from that phase is surfaced. On success, returns the
/// final section contents along with any warnings.
pub fn assemble(object: &mut Object) -> Result<(ObjectOutput, Vec<Diagnostic>)> {
    let mut diags = Diagnostics::new();

    object.finalize(&mut diags);
    phase_result(&diags).context("Failed during value finalization")?;

    object.optimize(&mut diags);
    phase_result(&diags).context("Failed during span optimization")?;

    let output = object.output(&mut diags);
    phase_result(&diags).context("Failed during output")?;

    let warnings = diags
        .all()
        .iter()
        .filter(|d| d.id.severity() == Severity::Warning)
        .cloned()
        .collect();
    Ok((output, warnings))
}
