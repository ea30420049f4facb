//! Assemble the single message sent to text backends.

use std::fmt::Write;

use super::GenerationRequest;

const INSTRUCTIONS: &str = "\
Infer the rule that maps each training input grid to its output grid.
Write a Python function `transform(grid)` that takes the input as a list of
lists of integers and returns the output in the same form. Only the standard
numeric modules (math, itertools, collections, numpy, ...) are importable;
file and network access are unavailable.
Reply with a single ```python code block defining `transform`.";

/// Render the problem, test inputs and feedback into one prompt.
pub fn render_prompt(request: &GenerationRequest<'_>) -> String {
    let mut out = String::new();
    out.push_str(INSTRUCTIONS);
    out.push_str("\n\n## Training examples\n");

    for (i, example) in request.problem.train().iter().enumerate() {
        let _ = write!(
            out,
            "\n### Example {}\nInput:\n{}\nOutput:\n{}\n",
            i + 1,
            example.input,
            example.output
        );
    }

    out.push_str("\n## Test inputs\n");
    for (i, input) in request.problem.test_inputs().iter().enumerate() {
        let _ = write!(out, "\n### Test {}\n{}\n", i + 1, input);
    }

    if !request.feedback.is_empty() {
        out.push_str("\n## Previous attempts (worst first, best last)\n\n");
        out.push_str(&request.feedback.render());
        out.push_str(
            "\nImprove on the last attempt. Fix every failing example without breaking passing ones.\n",
        );
    }

    out
}
