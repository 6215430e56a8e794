pub mod comments;
pub mod editor;
pub mod format;
pub mod html;
pub mod images;
pub mod mutate;
pub mod numbering;
pub mod package;
pub mod parse;
pub mod rels;
pub mod tree;
pub mod xml;

#[doc(hidden)]
pub mod fixtures;

/// WordprocessingML names, matched with the conventional `w:` prefix.
pub mod w {
    pub const DOCUMENT: &str = "w:document";
    pub const BODY: &str = "w:body";
    pub const P: &str = "w:p";
    pub const PPR: &str = "w:pPr";
    pub const R: &str = "w:r";
    pub const RPR: &str = "w:rPr";
    pub const T: &str = "w:t";
    pub const DRAWING: &str = "w:drawing";
    pub const PICT: &str = "w:pict";
    pub const SECT_PR: &str = "w:sectPr";
    pub const JC: &str = "w:jc";
    pub const P_STYLE: &str = "w:pStyle";
    pub const B: &str = "w:b";
    pub const I: &str = "w:i";
    pub const U: &str = "w:u";
    pub const VAL: &str = "w:val";
    pub const ID: &str = "w:id";

    pub const COMMENTS: &str = "w:comments";
    pub const COMMENT: &str = "w:comment";
    pub const AUTHOR: &str = "w:author";
    pub const DATE: &str = "w:date";
    pub const INITIALS: &str = "w:initials";
    pub const COMMENT_RANGE_START: &str = "w:commentRangeStart";
    pub const COMMENT_RANGE_END: &str = "w:commentRangeEnd";
    pub const COMMENT_REFERENCE: &str = "w:commentReference";

    pub const NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
    pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
}
