// src/frontend/ast.rs

use num_bigint::BigInt;

use crate::frontend::intern::Symbol;
use crate::frontend::span::Span;

/// Unique identifier for AST nodes (expressions, statements, declarations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

/// An expression node. Type expressions and value expressions share this
/// representation; semantic analysis decides which is which from context.
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(BigInt),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    NullLit,
    UndefLit,
    /// `.name` - an enum literal whose enum type comes from context.
    EnumLit(Symbol),
    /// `error.Name`
    ErrorLit(Symbol),
    Ident(Symbol),
    /// Namespace member access: `base.field`.
    FieldAccess {
        base: Box<Expr>,
        field: Symbol,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Option<Box<Expr>>,
    },

    // Type expressions
    PtrType {
        child: Box<Expr>,
        ptr_len: PtrLen,
        is_const: bool,
        is_volatile: bool,
        allow_zero: bool,
        align: Option<Box<Expr>>,
        /// Bit-pointer info: (bit_offset_in_host, host_int_bytes).
        host: Option<(u32, u64)>,
    },
    SliceType {
        child: Box<Expr>,
        is_const: bool,
        allow_zero: bool,
        align: Option<Box<Expr>>,
    },
    ArrayType {
        len: Box<Expr>,
        child: Box<Expr>,
    },
    VectorType {
        len: Box<Expr>,
        elem: Box<Expr>,
    },
    OptionalType(Box<Expr>),
    /// `E!T`; a missing error set means the inferred form `!T`.
    ErrorUnionType {
        err_set: Option<Box<Expr>>,
        payload: Box<Expr>,
    },
    /// `error{A, B}`
    ErrorSetDecl(Vec<ErrorSetField>),
    AnyFrameType {
        result: Option<Box<Expr>>,
    },
    /// `@Frame(f)`
    FrameType {
        fn_ref: Box<Expr>,
    },
    /// Anonymous container type expression.
    ContainerDecl(Box<ContainerDecl>),
    /// Function type expression (a proto without a body).
    FnProto(Box<FnProto>),

    // Builtins
    SizeOf(Box<Expr>),
    AlignOf(Box<Expr>),
    /// `@import("pkg-or-path")`
    Import(Box<Expr>),
    /// `@frame()` - address of the enclosing async frame.
    FrameAddr,

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        modifier: CallModifier,
        /// `@asyncCall`-style explicit stack; exempts the call from the
        /// shared frame slot.
        new_stack: Option<Box<Expr>>,
    },
    Await(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BoolNot,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    BoolAnd,
    BoolOr,
}

/// How many elements a pointer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrLen {
    /// `*T` - exactly one.
    Single,
    /// `[*]T` - unknown count.
    Unknown,
    /// `[*c]T` - C interop pointer; implies `allow_zero`.
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallModifier {
    None,
    Builtin,
    NoAsync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    Unspecified,
    C,
    Cold,
    Naked,
    Stdcall,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Struct,
    Union,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLayout {
    Auto,
    Extern,
    Packed,
}

/// The parenthesized argument of a container declaration:
/// `enum(u8)`, `union(enum)`, `union(E)`.
#[derive(Debug, Clone)]
pub enum ContainerArg {
    /// `union(enum)` - auto-synthesized tag, optionally `union(enum(T))`.
    InferredEnum(Option<Box<Expr>>),
    /// `enum(T)` or `union(E)` - an explicit type expression.
    Type(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct ContainerDecl {
    pub id: NodeId,
    pub span: Span,
    /// Anonymous containers carry no name; roots get the file's namespace name.
    pub name: Option<Symbol>,
    pub kind: ContainerKind,
    pub layout: ContainerLayout,
    pub arg: Option<ContainerArg>,
    pub fields: Vec<FieldDecl>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Symbol,
    /// Enum fields have no type expression.
    pub type_expr: Option<Expr>,
    pub align_expr: Option<Expr>,
    /// Explicit enum tag value or union(enum) tag value.
    pub value_expr: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ErrorSetField {
    pub span: Span,
    pub name: Symbol,
}

/// Top-level declarations inside a container.
#[derive(Debug, Clone)]
pub enum Decl {
    Var(VarDecl),
    Fn(FnDecl),
    CompTime(CompTimeDecl),
    UsingNamespace(UsingNamespaceDecl),
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Symbol,
    pub is_const: bool,
    pub is_pub: bool,
    pub is_comptime: bool,
    /// `export var x` - participates in the global export table.
    pub export_name: Option<String>,
    pub type_expr: Option<Expr>,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct FnDecl {
    pub proto: FnProto,
    pub body: Option<Block>,
}

#[derive(Debug, Clone)]
pub struct FnProto {
    pub id: NodeId,
    pub span: Span,
    pub name: Option<Symbol>,
    pub cc: CallConv,
    pub params: Vec<ParamDecl>,
    pub return_type: Box<Expr>,
    pub is_var_args: bool,
    pub is_extern: bool,
    pub is_pub: bool,
    pub export_name: Option<String>,
    pub align_expr: Option<Box<Expr>>,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Option<Symbol>,
    /// `None` means `var`-typed (generic).
    pub type_expr: Option<Expr>,
    pub is_comptime: bool,
    pub is_noalias: bool,
}

#[derive(Debug, Clone)]
pub struct CompTimeDecl {
    pub id: NodeId,
    pub span: Span,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct UsingNamespaceDecl {
    pub id: NodeId,
    pub span: Span,
    pub is_pub: bool,
    pub target: Expr,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Local(LocalVar),
    Expr(Expr),
    Return(Option<Expr>),
    /// `suspend;` or `suspend { ... }`
    Suspend(Option<Block>),
    Defer(Block),
    Block(Block),
    While {
        cond: Expr,
        body: Block,
    },
}

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub id: NodeId,
    pub span: Span,
    pub name: Symbol,
    pub is_const: bool,
    pub is_comptime: bool,
    pub type_expr: Option<Expr>,
    pub init: Option<Expr>,
    pub align_expr: Option<Expr>,
}
