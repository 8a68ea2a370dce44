//! 指令标签解析
//!
//! 模型输出里的成对大小写敏感标签（`<SEARCH>q</SEARCH>`、`<CANVAS_TRIGGER>…` 等）解析为 Directive；
//! 每种标签各自独立扫描、不递归，除 SEARCH 外只取第一次出现。开标签之后没有闭标签时，
//! 剩余全文作为 payload。decide 按固定优先级给出本轮的下一步。

use crate::core::Action;

/// 指令种类：循环动作 + SEARCH
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveKind {
    Deep,
    Search,
    Image,
    Project,
    Canvas,
    Study,
}

impl DirectiveKind {
    /// 对应的循环动作（SEARCH 不改变动作）
    pub fn action(&self) -> Option<Action> {
        match self {
            DirectiveKind::Deep => Some(Action::DeepSearch),
            DirectiveKind::Search => None,
            DirectiveKind::Image => Some(Action::Image),
            DirectiveKind::Project => Some(Action::Project),
            DirectiveKind::Canvas => Some(Action::Canvas),
            DirectiveKind::Study => Some(Action::Study),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// 已去除首尾空白，非空
    pub payload: String,
    /// 开标签在原文中的字节偏移
    pub position: usize,
}

/// 解析结果：按出现位置排序的指令 + 去掉已识别片段后的文本
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub directives: Vec<Directive>,
    pub clean_text: String,
}

impl ParsedOutput {
    pub fn first(&self, kind: DirectiveKind) -> Option<&Directive> {
        self.directives.iter().find(|d| d.kind == kind)
    }

    /// 所有 SEARCH 查询，按出现顺序
    pub fn search_queries(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter(|d| d.kind == DirectiveKind::Search)
            .map(|d| d.payload.as_str())
            .collect()
    }
}

/// 一种写法：开标签 + 可接受的闭标签（按原文中先出现者为准）
struct TagForm {
    open: &'static str,
    closes: &'static [&'static str],
}

const DEEP_FORMS: &[TagForm] = &[TagForm { open: "<DEEP>", closes: &["</DEEP>"] }];
const SEARCH_FORMS: &[TagForm] = &[TagForm { open: "<SEARCH>", closes: &["</SEARCH>"] }];
const IMAGE_FORMS: &[TagForm] = &[TagForm { open: "<IMAGE>", closes: &["</IMAGE>"] }];
const PROJECT_FORMS: &[TagForm] = &[TagForm { open: "<PROJECT>", closes: &["</PROJECT>"] }];
const STUDY_FORMS: &[TagForm] = &[TagForm { open: "<STUDY>", closes: &["</STUDY>"] }];
/// Canvas 闭合标签：流式输出中出现任一即可提前停止，任一开标签都接受
const CANVAS_CLOSE_TAGS: [&str; 3] = ["</CANVAS_TRIGGER>", "</CANVASTRIGGER>", "</CANVAS>"];

const CANVAS_FORMS: &[TagForm] = &[
    TagForm { open: "<CANVAS_TRIGGER>", closes: &CANVAS_CLOSE_TAGS },
    TagForm { open: "<CANVAS>", closes: &CANVAS_CLOSE_TAGS },
    TagForm { open: "<CANVASTRIGGER>", closes: &CANVAS_CLOSE_TAGS },
];

pub fn closes_canvas(buffer: &str) -> bool {
    CANVAS_CLOSE_TAGS.iter().any(|tag| buffer.contains(tag))
}

/// 一次匹配：span 覆盖开标签到闭标签（或 EOF）
struct TagMatch {
    start: usize,
    end: usize,
    payload: String,
    well_formed: bool,
}

fn match_at(text: &str, from: usize, form: &TagForm) -> Option<TagMatch> {
    let start = from + text.get(from..)?.find(form.open)?;
    let body_start = start + form.open.len();
    let rest = &text[body_start..];
    let close = form
        .closes
        .iter()
        .filter_map(|c| rest.find(c).map(|i| (i, c.len())))
        .min_by_key(|(i, _)| *i);
    Some(match close {
        Some((i, len)) => TagMatch {
            start,
            end: body_start + i + len,
            payload: rest[..i].trim().to_string(),
            well_formed: true,
        },
        None => TagMatch {
            start,
            end: text.len(),
            payload: rest.trim().to_string(),
            well_formed: false,
        },
    })
}

/// 单次出现的种类：按写法顺序取第一个闭合匹配，全部未闭合时取第一个容错匹配
fn first_match(text: &str, forms: &[TagForm]) -> Option<TagMatch> {
    let mut tolerant = None;
    for form in forms {
        match match_at(text, 0, form) {
            Some(m) if m.well_formed => return Some(m),
            Some(m) if tolerant.is_none() => tolerant = Some(m),
            _ => {}
        }
    }
    tolerant
}

fn all_matches(text: &str, form: &TagForm) -> Vec<TagMatch> {
    let mut matches = Vec::new();
    let mut from = 0;
    while let Some(m) = match_at(text, from, form) {
        from = m.end;
        let done = !m.well_formed;
        matches.push(m);
        if done || from >= text.len() {
            break;
        }
    }
    matches
}

/// 解析一段输出（只应传入本轮生成的文本）
pub fn parse_directives(text: &str) -> ParsedOutput {
    let mut found: Vec<(DirectiveKind, TagMatch)> = Vec::new();

    for (kind, forms) in [
        (DirectiveKind::Deep, DEEP_FORMS),
        (DirectiveKind::Image, IMAGE_FORMS),
        (DirectiveKind::Project, PROJECT_FORMS),
        (DirectiveKind::Canvas, CANVAS_FORMS),
        (DirectiveKind::Study, STUDY_FORMS),
    ] {
        if let Some(m) = first_match(text, forms) {
            found.push((kind, m));
        }
    }
    for form in SEARCH_FORMS {
        found.extend(all_matches(text, form).into_iter().map(|m| (DirectiveKind::Search, m)));
    }

    let mut spans: Vec<(usize, usize)> = found.iter().map(|(_, m)| (m.start, m.end)).collect();
    spans.sort_unstable();
    let mut clean_text = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start > cursor {
            clean_text.push_str(&text[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    if cursor < text.len() {
        clean_text.push_str(&text[cursor..]);
    }

    let mut directives: Vec<Directive> = found
        .into_iter()
        .filter(|(_, m)| !m.payload.is_empty())
        .map(|(kind, m)| Directive {
            kind,
            payload: m.payload,
            position: m.start,
        })
        .collect();
    directives.sort_by_key(|d| d.position);

    ParsedOutput {
        directives,
        clean_text,
    }
}

/// 本轮之后的下一步
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// 改写动作与 prompt 后重新进入生成分支
    Redirect { action: Action, prompt: String },
    /// 在循环内执行第一条搜索
    Search { query: String },
    /// 单个 SEARCH 且尚无搜索上下文：结束并返回已生成文本
    StopAtSearch,
    /// 丢弃已生成文本，交给 Canvas 协作方
    Canvas { prompt: String },
    /// 没有可执行的指令
    Done,
}

/// 优先级：DEEP > SEARCH > IMAGE > PROJECT > CANVAS > STUDY
pub fn decide(parsed: &ParsedOutput, has_search_context: bool, defer_single_search: bool) -> Decision {
    if let Some(d) = parsed.first(DirectiveKind::Deep) {
        return Decision::Redirect {
            action: Action::DeepSearch,
            prompt: d.payload.clone(),
        };
    }

    let queries = parsed.search_queries();
    if let Some(first) = queries.first() {
        if queries.len() == 1 && !has_search_context && defer_single_search {
            return Decision::StopAtSearch;
        }
        return Decision::Search {
            query: first.to_string(),
        };
    }

    for kind in [DirectiveKind::Image, DirectiveKind::Project] {
        if let (Some(d), Some(action)) = (parsed.first(kind), kind.action()) {
            return Decision::Redirect {
                action,
                prompt: d.payload.clone(),
            };
        }
    }

    if let Some(d) = parsed.first(DirectiveKind::Canvas) {
        return Decision::Canvas {
            prompt: d.payload.clone(),
        };
    }

    if let Some(d) = parsed.first(DirectiveKind::Study) {
        return Decision::Redirect {
            action: Action::Study,
            prompt: d.payload.clone(),
        };
    }

    Decision::Done
}
