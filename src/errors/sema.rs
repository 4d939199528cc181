// src/errors/sema.rs
//! Semantic analysis errors (E3xxx).

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum SemanticError {
    // =========================================================================
    // Self-reference (E30xx)
    // =========================================================================
    #[error("{kind} '{name}' depends on itself")]
    #[diagnostic(code(E3001))]
    DependsOnItself {
        kind: &'static str,
        name: String,
        #[label("while resolving this type")]
        span: SourceSpan,
    },

    // =========================================================================
    // Shape (E31xx)
    // =========================================================================
    #[error("container field missing type")]
    #[diagnostic(code(E3101))]
    MissingFieldType {
        #[label("field has no type")]
        span: SourceSpan,
    },

    #[error("function declaration missing name")]
    #[diagnostic(code(E3102))]
    MissingFnName {
        #[label("anonymous function at top level")]
        span: SourceSpan,
    },

    #[error("non-extern function has no body")]
    #[diagnostic(code(E3103))]
    FnWithoutBody {
        #[label("body required here")]
        span: SourceSpan,
    },

    #[error("duplicate container member name '{name}'")]
    #[diagnostic(code(E3104))]
    DuplicateMember {
        name: String,
        #[label("duplicate name")]
        span: SourceSpan,
        #[label("previously declared here")]
        previous: SourceSpan,
    },

    #[error("exported symbol collision: '{name}'")]
    #[diagnostic(code(E3105))]
    ExportCollision {
        name: String,
        #[label("exported here")]
        span: SourceSpan,
        #[label("other export here")]
        previous: SourceSpan,
    },

    #[error("enums must have at least one field")]
    #[diagnostic(code(E3106))]
    EmptyEnum {
        #[label("empty enum")]
        span: SourceSpan,
    },

    #[error("unions must have at least one field")]
    #[diagnostic(code(E3107))]
    EmptyUnion {
        #[label("empty union")]
        span: SourceSpan,
    },

    // =========================================================================
    // Packed / extern violations (E32xx)
    // =========================================================================
    #[error("packed {container_kind}s cannot contain fields of type '{ty}'")]
    #[diagnostic(
        code(E3201),
        help("packed fields need a guaranteed in-memory bit representation")
    )]
    NotAllowedInPacked {
        container_kind: &'static str,
        ty: String,
        #[label("field type has no guaranteed bit layout")]
        span: SourceSpan,
    },

    #[error("extern {container_kind}s cannot contain fields of type '{ty}'")]
    #[diagnostic(code(E3202))]
    NotAllowedInExtern {
        container_kind: &'static str,
        ty: String,
        #[label("type is not C-ABI compatible")]
        span: SourceSpan,
    },

    #[error("opaque types have unknown size and therefore cannot be embedded")]
    #[diagnostic(code(E3203))]
    OpaqueField {
        #[label("field of opaque type")]
        span: SourceSpan,
    },

    // =========================================================================
    // Value domain (E33xx)
    // =========================================================================
    #[error("alignment value {value} is not a power of 2")]
    #[diagnostic(code(E3301))]
    AlignNotPowerOfTwo {
        value: String,
        #[label("invalid alignment")]
        span: SourceSpan,
    },

    #[error("enumeration value {value} too large for type '{tag_ty}'")]
    #[diagnostic(code(E3302))]
    EnumTagOutOfRange {
        value: String,
        tag_ty: String,
        #[label("does not fit the tag type")]
        span: SourceSpan,
    },

    #[error("enum tag value {value} already taken")]
    #[diagnostic(code(E3303))]
    EnumTagDuplicate {
        value: String,
        #[label("duplicate tag value")]
        span: SourceSpan,
        #[label("first occurrence here")]
        previous: SourceSpan,
    },

    #[error("expected integer tag type, found '{found}'")]
    #[diagnostic(code(E3304))]
    TagTypeNotInteger {
        found: String,
        #[label("tag type must be an integer")]
        span: SourceSpan,
    },

    #[error("enum field '{name}' missing from union")]
    #[diagnostic(code(E3305))]
    UnionMissingEnumField {
        name: String,
        #[label("union does not cover this enum field")]
        span: SourceSpan,
        #[label("declared here")]
        enum_field: SourceSpan,
    },

    #[error("union field '{name}' is not a member of enum '{enum_ty}'")]
    #[diagnostic(code(E3306))]
    UnionFieldNotInEnum {
        name: String,
        enum_ty: String,
        #[label("no matching enum field")]
        span: SourceSpan,
    },

    // =========================================================================
    // Functions (E34xx)
    // =========================================================================
    #[error("parameter of type '{ty}' not allowed")]
    #[diagnostic(code(E3401))]
    ParamTypeNotAllowed {
        ty: String,
        #[label("invalid parameter type")]
        span: SourceSpan,
    },

    #[error("parameter of type '{ty}' must be declared comptime")]
    #[diagnostic(code(E3402))]
    ParamRequiresComptime {
        ty: String,
        #[label("type is only known at compile time")]
        span: SourceSpan,
    },

    #[error("var args only allowed in functions with C calling convention")]
    #[diagnostic(code(E3403))]
    VarArgsNotAllowed {
        #[label("variadic marker here")]
        span: SourceSpan,
    },

    #[error("parameter of type '{ty}' not allowed in function with calling convention '{cc}'")]
    #[diagnostic(code(E3404))]
    ParamNotExternCompatible {
        ty: String,
        cc: &'static str,
        #[label("not representable in this ABI")]
        span: SourceSpan,
    },

    #[error("opaque return type not allowed")]
    #[diagnostic(code(E3405))]
    OpaqueReturnType {
        #[label("function returns an opaque type")]
        span: SourceSpan,
        #[label("opaque type declared here")]
        declared: SourceSpan,
    },

    // =========================================================================
    // Async (E35xx)
    // =========================================================================
    #[error("function with calling convention '{cc}' cannot be async")]
    #[diagnostic(code(E3501))]
    CannotBeAsync {
        cc: &'static str,
        #[label("prototype here")]
        span: SourceSpan,
    },

    #[error("recursive function cannot be async")]
    #[diagnostic(code(E3502), help("an async recursion would need an unbounded frame"))]
    RecursiveAsync {
        #[label("prototype here")]
        span: SourceSpan,
    },

    #[error("unable to infer whether '{name}' should be async")]
    #[diagnostic(code(E3503))]
    UnableToInferAsync {
        name: String,
        #[label("assumed non-async before analysis completed")]
        span: SourceSpan,
    },

    #[error("function is not comptime-known; @asyncCall required")]
    #[diagnostic(code(E3504))]
    CalleeNotComptimeKnown {
        #[label("called through a runtime pointer")]
        span: SourceSpan,
    },

    #[error("@Frame() of non-async function")]
    #[diagnostic(code(E3505))]
    FrameOfNonAsyncFn {
        #[label("function never suspends")]
        span: SourceSpan,
    },

    // =========================================================================
    // Imports (E36xx)
    // =========================================================================
    #[error("import of file outside package path: '{path}'")]
    #[diagnostic(code(E3601))]
    ImportOutsidePkgPath {
        path: String,
        #[label("resolves outside the package root")]
        span: SourceSpan,
    },

    #[error("unable to load '{path}': {reason}")]
    #[diagnostic(code(E3602))]
    FileFetchFailed {
        path: String,
        reason: String,
        #[label("imported here")]
        span: SourceSpan,
    },

    // =========================================================================
    // Ambiguity / misc (E37xx)
    // =========================================================================
    #[error("variable initialization is unreachable")]
    #[diagnostic(code(E3701))]
    UnreachableInit {
        #[label("initializer never produces a value")]
        span: SourceSpan,
    },

    #[error("unable to infer variable type")]
    #[diagnostic(code(E3702))]
    UnableToInferVarType {
        #[label("no type and no initializer")]
        span: SourceSpan,
    },

    #[error("redeclaration of '{name}'")]
    #[diagnostic(code(E3703))]
    Redeclaration {
        name: String,
        #[label("redeclared here")]
        span: SourceSpan,
        #[label("previous declaration here")]
        previous: SourceSpan,
    },

    #[error("declaration shadows primitive type '{name}'")]
    #[diagnostic(code(E3704))]
    ShadowsPrimitive {
        name: String,
        #[label("shadows a primitive")]
        span: SourceSpan,
    },

    #[error("declaration of '{name}' shadows a declaration from an outer scope")]
    #[diagnostic(code(E3705))]
    ShadowsOuter {
        name: String,
        #[label("inner declaration")]
        span: SourceSpan,
        #[label("outer declaration here")]
        previous: SourceSpan,
    },

    #[error("use of undeclared identifier '{name}'")]
    #[diagnostic(code(E3706))]
    UndeclaredIdentifier {
        name: String,
        #[label("not found in scope")]
        span: SourceSpan,
    },

    #[error("expected type expression, found '{found}'")]
    #[diagnostic(code(E3707))]
    ExpectedType {
        found: String,
        #[label("not a type")]
        span: SourceSpan,
    },

    #[error("expected compile-time constant")]
    #[diagnostic(code(E3708))]
    ExpectedComptimeValue {
        #[label("value only known at runtime")]
        span: SourceSpan,
    },

    #[error("evaluation exceeded {quota} backwards branches")]
    #[diagnostic(
        code(E3709),
        help("use @setEvalBranchQuota to raise the limit for this call")
    )]
    QuotaExceeded {
        quota: u32,
        #[label("loop here")]
        span: SourceSpan,
    },

    #[error("division by zero")]
    #[diagnostic(code(E3710))]
    DivisionByZero {
        #[label("divisor is zero")]
        span: SourceSpan,
    },

    #[error("array length must be a non-negative integer, found {found}")]
    #[diagnostic(code(E3711))]
    InvalidArrayLength {
        found: String,
        #[label("invalid length")]
        span: SourceSpan,
    },

    #[error("vector element type must be int, float, bool, or pointer; found '{found}'")]
    #[diagnostic(code(E3712))]
    InvalidVectorElem {
        found: String,
        #[label("invalid element type")]
        span: SourceSpan,
    },
}
