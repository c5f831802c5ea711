//! Fixed prompt templates and a single-pass `{placeholder}` filler.

pub const SUMMARY_TEMPLATE: &str = "
You are an AI assistant that is tasked with summarizing a web page.
Your summary should be detailed and cover all key points mentioned in the web page.
Below is the extracted content of the web page:
{content}

Please provide a comprehensive and detailed summary in Markdown format.
";

pub const QA_TEMPLATE: &str = "
You are an AI assistant tasked with answering questions based solely
on the provided context. Your goal is to generate a comprehensive answer
for the given question using only the information available in the context.

context: {context}

question: {question}

<response> Your answer in Markdown format. </response>
";

pub const GUIDELINES_TEMPLATE: &str = "
Generate a comprehensive, structured set of FX trade processing guidelines to serve as a benchmark for evaluating real-world trade execution and post-trade workflows. The guidelines must be specific, actionable, and measurable to enable systematic comparison against actual processes.

Structure the guidelines under the following core categories:
1. **Compliance & Regulatory Adherence**
   * Explicit alignment with relevant regulations (e.g., MiFID II, EMIR, Basel III).
   * Mandatory documentation, reporting standards, and audit requirements.
2. **Pre-Trade Risk Management**
   * Criteria for credit limits, counterparty risk assessments, and exposure thresholds.
   * Validation of trade parameters (e.g., currency pairs, amounts, settlement dates).
3. **Trade Execution Protocols**
   * Best practices for price verification, liquidity sourcing, and timestamping.
   * Rules for partial fills, slippage thresholds, and market abuse safeguards.
4. **Post-Trade Processing**
   * Requirements for confirmation matching, settlement instructions, and netting procedures.
   * Timelines for exception handling, dispute resolution, and failover workflows.
5. **Operational Controls**
   * Reconciliation processes, system redundancy checks, and data integrity standards.
   * Escalation protocols for deviations (e.g., missed settlements, unauthorized trades).
6. **Documentation & Auditability**
   * Record-keeping standards for trade lifecycle metadata (e.g., chat logs, order history).
   * Retention policies and audit trail accessibility.

Include examples of both compliant and non-compliant scenarios to clarify expectations. Prioritize conciseness, regulatory rigor, and adaptability to automated system checks. Ensure guidelines are agnostic to institutional size but enforceable via technical or procedural controls.

Use the following context to inform your guidelines:

{context}
";

/// Stands in for the guidelines context when neither the index nor the reference folder contribute anything.
pub const GUIDELINES_FALLBACK_CONTEXT: &str = "No specific context available. Generate comprehensive FX trade guidelines based on industry best practices.";

/// Replaces `{name}` placeholders in one pass, so substituted values are never re-scanned.
/// Unknown placeholders are left as-is.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + vars.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
