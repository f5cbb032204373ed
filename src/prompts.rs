//! 프롬프트 템플릿
//!
//! `{name}` 자리표시자는 한 번의 스캔으로 치환됩니다.
//! 삽입된 값은 다시 해석되지 않으므로 컨텍스트에 중괄호가 있어도 템플릿이 깨지지 않습니다.

/// 표 요약 프롬프트
pub const TABLE_SUMMARY_PROMPT: &str = "\
You are an assistant tasked with summarizing tables provided in CSV format. \
Give a brief summary of the table and list the row and column names to identify \
what is captured in the table. Do not summarize quantitative results in the table.
Table:
{table}
";

/// 답변 생성 프롬프트
pub const RESPONSE_GENERATION_PROMPT: &str = "\
Answer the question based only on the following context. Each section of the context \
is labeled with a page number, for example 'Page X:', followed by the content:
{context}
When answering, reference the page numbers your information comes from. Keep the answer \
clear and relevant without unnecessary details.
If the context does not contain relevant information to answer the query, respond with: \
\"{no_answer}\". Do not use any knowledge outside of the provided context.
Include the references like this: [page_num:54][page_num:78]. Only mention page numbers \
when you actually answer the query.{language}

Question: {question}
";

/// 채점 프롬프트
pub const EVALUATION_PROMPT: &str = "\
Your task is to evaluate responses from a retrieval-augmented pipeline for a given query.

- Query: {query}
- Reference Answer: {reference_answer}
- Generated Answer: {generated_answer}

Assign a score of 0 or 1:

1. Score 1: the generated answer addresses the query consistently with the reference answer. \
It does not need to match word for word or be highly detailed. Page references may differ \
from the reference answer if the content matches, since an answer can appear on several pages.

2. Score 0: the generated answer is irrelevant, does not address the query, or contradicts \
the reference answer.

Return nothing other than 1 or 0.
";

/// 자리표시자를 값으로 치환 (모르는 이름은 그대로 둠)
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// 답변 생성 프롬프트 채우기
pub fn response_prompt(
    context: &str,
    question: &str,
    no_answer: &str,
    language: Option<&str>,
) -> String {
    let language = language
        .map(|l| format!(" Please return your answer in {} only.", l))
        .unwrap_or_default();
    fill_template(
        RESPONSE_GENERATION_PROMPT,
        &[
            ("context", context),
            ("question", question),
            ("no_answer", no_answer),
            ("language", &language),
        ],
    )
}

pub fn table_summary_prompt(table: &str) -> String {
    fill_template(TABLE_SUMMARY_PROMPT, &[("table", table)])
}

pub fn evaluation_prompt(query: &str, reference_answer: &str, generated_answer: &str) -> String {
    fill_template(
        EVALUATION_PROMPT,
        &[
            ("query", query),
            ("reference_answer", reference_answer),
            ("generated_answer", generated_answer),
        ],
    )
}

// ============================================================================
// Tests
// ============================================================================
