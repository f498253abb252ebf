//! Human-readable text output

use crate::distributed::coordinator::Submission;
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// The line operators (and scripts) look for after each job
pub fn format_result(value: f64) -> String {
    format!("Integration result: {}", value)
}

/// Print the final value of a job
pub fn print_result(value: f64) {
    println!("{}", format_result(value));
}

/// Print how a job was spread across workers
pub fn print_submission(submission: &Submission, elapsed: Duration) {
    println!("═══════════════════════════════════════════════════════════");
    println!(
        "Job {}: [{}, {}) step {}",
        submission.job_id,
        submission.params.lower,
        submission.params.upper,
        submission.params.step
    );
    println!(
        "  Workers: {}  Capacity: {}  Sub-tasks: {}",
        submission.shares.len(),
        submission.total_capacity,
        submission.task_count()
    );
    for share in &submission.shares {
        match share.interval {
            Some((lower, upper)) => println!(
                "  Session {:>3} (capacity {:>3}): {:>3} sub-tasks over [{}, {})",
                share.session_id,
                share.capacity,
                share.task_ids.len(),
                lower,
                upper
            ),
            None => println!(
                "  Session {:>3} (capacity {:>3}): idle",
                share.session_id, share.capacity
            ),
        }
    }
    println!("  Elapsed: {:.3}s", elapsed.as_secs_f64());
}

/// Ask the operator for job bounds on `input`
///
/// Returns `Ok(None)` once input is exhausted. A line that does not parse is
/// reported and asked again.
pub fn prompt_job<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> io::Result<Option<(f64, f64, f64)>> {
    let Some(lower) = prompt_number(input, output, "Enter the lower bound: ")? else {
        return Ok(None);
    };
    let Some(upper) = prompt_number(input, output, "Enter the upper bound: ")? else {
        return Ok(None);
    };
    let Some(step) = prompt_number(input, output, "Enter the step size: ")? else {
        return Ok(None);
    };
    Ok(Some((lower, upper, step)))
}

fn prompt_number<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
) -> io::Result<Option<f64>> {
    loop {
        write!(output, "{}", prompt)?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => return Ok(Some(value)),
            _ => writeln!(output, "Not a number: {}", line.trim())?,
        }
    }
}
