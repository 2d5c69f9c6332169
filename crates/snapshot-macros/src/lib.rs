use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::parse::{Parse, ParseStream};
use syn::{braced, parenthesized, parse_macro_input, token, Ident, Lit, LitInt, LitStr, Token};

/// Builds a snapshot template from an element tree.
///
/// ```ignore
/// let card = snapshot! {
///     "card", css_id = 3,
///     view(class = dyn, bindtap = dyn, data-kind = "hero") {
///         text { dyn }
///         children
///     }
/// };
/// registry.register(card.build()?);
/// ```
///
/// Every `dyn` is a dynamic expression; indices follow document order.
/// `children` attaches every child instance under the enclosing element,
/// `slot` creates a wrapper that takes one child instance. `..dyn` spreads a
/// map of props onto the element. The expansion is a
/// `snapshot_core::template::TemplateBuilder`.
#[proc_macro]
pub fn snapshot(input: TokenStream) -> TokenStream {
    let template = parse_macro_input!(input as TemplateInput);
    match template.expand() {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct TemplateInput {
    id: LitStr,
    css_id: Option<LitInt>,
    entry: Option<LitStr>,
    root: Node,
}

enum Node {
    Element(Element),
    Text(LitStr),
    Dynamic(Span),
    Children(Span),
    Slot(Span),
}

struct Element {
    tag: String,
    span: Span,
    attrs: Vec<Attr>,
    children: Vec<Node>,
}

struct Attr {
    name: String,
    span: Span,
    value: AttrValue,
}

enum AttrValue {
    Dynamic,
    Spread,
    Static(Lit),
}

/// Parses `scroll-view`, `main-thread:bindtap` and friends as one name.
fn parse_name(input: ParseStream) -> syn::Result<(String, Span)> {
    if input.peek(LitStr) {
        let lit: LitStr = input.parse()?;
        return Ok((lit.value(), lit.span()));
    }
    let first = Ident::parse_any(input)?;
    let span = first.span();
    let mut name = first.to_string();
    loop {
        if input.peek(Token![-]) {
            input.parse::<Token![-]>()?;
            name.push('-');
        } else if input.peek(Token![:]) && !input.peek(Token![::]) {
            input.parse::<Token![:]>()?;
            name.push(':');
        } else {
            break;
        }
        name.push_str(&Ident::parse_any(input)?.to_string());
    }
    Ok((name, span))
}

impl Parse for TemplateInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let id: LitStr = input.parse()?;
        let mut css_id = None;
        let mut entry = None;
        input.parse::<Token![,]>()?;
        while input.peek(Ident) && input.peek2(Token![=]) {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            match key.to_string().as_str() {
                "css_id" => css_id = Some(input.parse()?),
                "entry" => entry = Some(input.parse()?),
                _ => return Err(syn::Error::new(key.span(), "expected `css_id` or `entry`")),
            }
            input.parse::<Token![,]>()?;
        }
        let root: Node = input.parse()?;
        input.parse::<Option<Token![,]>>()?;
        if !input.is_empty() {
            return Err(input.error("a template has exactly one root element"));
        }
        Ok(Self {
            id,
            css_id,
            entry,
            root,
        })
    }
}

impl Parse for Node {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(Token![dyn]) {
            let token: Token![dyn] = input.parse()?;
            return Ok(Node::Dynamic(token.span));
        }
        if input.peek(LitStr) {
            return Ok(Node::Text(input.parse()?));
        }
        let (tag, span) = parse_name(input)?;
        let bare = !input.peek(token::Paren) && !input.peek(token::Brace);
        if bare && tag == "children" {
            return Ok(Node::Children(span));
        }
        if bare && tag == "slot" {
            return Ok(Node::Slot(span));
        }

        let mut attrs = Vec::new();
        if input.peek(token::Paren) {
            let content;
            parenthesized!(content in input);
            while !content.is_empty() {
                attrs.push(content.parse()?);
                if content.is_empty() {
                    break;
                }
                content.parse::<Token![,]>()?;
            }
        }
        let mut children = Vec::new();
        if input.peek(token::Brace) {
            let content;
            braced!(content in input);
            while !content.is_empty() {
                children.push(content.parse()?);
                content.parse::<Option<Token![,]>>()?;
            }
        }
        Ok(Node::Element(Element {
            tag,
            span,
            attrs,
            children,
        }))
    }
}

impl Parse for Attr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(Token![..]) {
            let dots: Token![..] = input.parse()?;
            input.parse::<Token![dyn]>()?;
            return Ok(Attr {
                name: "..".to_string(),
                span: dots.spans[0],
                value: AttrValue::Spread,
            });
        }
        let (name, span) = parse_name(input)?;
        input.parse::<Token![=]>()?;
        let value = if input.peek(Token![dyn]) {
            input.parse::<Token![dyn]>()?;
            AttrValue::Dynamic
        } else {
            AttrValue::Static(input.parse()?)
        };
        Ok(Attr { name, span, value })
    }
}

fn event_prop(key: &str) -> Option<(TokenStream2, &str)> {
    const PREFIXES: [(&str, &str); 5] = [
        ("global-bind", "GlobalBind"),
        ("capture-bind", "CaptureBind"),
        ("capture-catch", "CaptureCatch"),
        ("bind", "Bind"),
        ("catch", "Catch"),
    ];
    PREFIXES.iter().find_map(|(prefix, variant)| {
        let rest = key.strip_prefix(prefix)?;
        let name = rest.strip_prefix(':').unwrap_or(rest);
        if name.is_empty() {
            return None;
        }
        let variant = Ident::new(variant, Span::call_site());
        Some((quote!(::snapshot_core::EventType::#variant), name))
    })
}

#[derive(PartialEq)]
enum SlotStyle {
    Children,
    Slots,
}

#[derive(Default)]
struct Codegen {
    statements: Vec<TokenStream2>,
    handles: Vec<Ident>,
    updaters: Vec<TokenStream2>,
    slots: Vec<TokenStream2>,
    slot_style: Option<SlotStyle>,
}

impl Codegen {
    fn create(&mut self, kind: TokenStream2, parent: Option<usize>) -> usize {
        let index = self.handles.len();
        let handle = format_ident!("__e{}", index);
        self.statements
            .push(quote!(let #handle = __native.create_element(&#kind);));
        if let Some(parent) = parent {
            let parent = &self.handles[parent];
            self.statements
                .push(quote!(__native.append_element(#parent, #handle);));
        }
        self.handles.push(handle);
        index
    }

    fn slot_style(&mut self, style: SlotStyle, span: Span) -> syn::Result<()> {
        match &self.slot_style {
            Some(SlotStyle::Children) => Err(syn::Error::new(
                span,
                "`children` cannot be combined with other slots",
            )),
            Some(existing) if *existing != style => Err(syn::Error::new(
                span,
                "`children` cannot be combined with other slots",
            )),
            _ => {
                self.slot_style = Some(style);
                Ok(())
            }
        }
    }

    fn node(&mut self, node: &Node, parent: Option<usize>) -> syn::Result<()> {
        match node {
            Node::Element(element) => self.element(element, parent),
            Node::Text(text) => {
                let index = self.create(quote!(::snapshot_core::ElementKind::RawText), parent);
                let handle = &self.handles[index];
                self.statements.push(quote! {
                    __native.set_attribute(#handle, "text", &::snapshot_core::PropValue::from(#text));
                });
                Ok(())
            }
            Node::Dynamic(_) => {
                let index = self.create(quote!(::snapshot_core::ElementKind::RawText), parent);
                self.updaters
                    .push(quote!(::snapshot_core::updaters::text(#index)));
                Ok(())
            }
            Node::Children(span) => {
                let Some(parent) = parent else {
                    return Err(syn::Error::new(*span, "`children` needs an enclosing element"));
                };
                self.slot_style(SlotStyle::Children, *span)?;
                self.slots.push(quote!(.children(#parent)));
                Ok(())
            }
            Node::Slot(span) => {
                if parent.is_none() {
                    return Err(syn::Error::new(*span, "`slot` needs an enclosing element"));
                }
                self.slot_style(SlotStyle::Slots, *span)?;
                let index = self.create(quote!(::snapshot_core::ElementKind::Wrapper), parent);
                self.slots.push(quote!(.slot(#index)));
                Ok(())
            }
        }
    }

    fn element(&mut self, element: &Element, parent: Option<usize>) -> syn::Result<()> {
        let tag = LitStr::new(&element.tag, element.span);
        let index = self.create(quote!(::snapshot_core::ElementKind::from_tag(#tag)), parent);
        for attr in &element.attrs {
            self.attr(attr, index)?;
        }
        for child in &element.children {
            self.node(child, Some(index))?;
        }
        Ok(())
    }

    fn attr(&mut self, attr: &Attr, index: usize) -> syn::Result<()> {
        let name = attr.name.as_str();
        match &attr.value {
            AttrValue::Spread => {
                self.updaters
                    .push(quote!(::snapshot_core::updaters::spread(#index)));
            }
            AttrValue::Static(lit) => {
                if event_prop(name).is_some() || name.starts_with("main-thread:") || name == "ref" {
                    return Err(syn::Error::new(attr.span, format!("`{name}` must be bound to `dyn`")));
                }
                let handle = &self.handles[index];
                self.statements.push(quote! {
                    __native.set_attribute(#handle, #name, &::snapshot_core::PropValue::from(#lit));
                });
            }
            AttrValue::Dynamic => {
                let updater = if let Some(worklet) = name.strip_prefix("main-thread:") {
                    match worklet {
                        "ref" => quote!(::snapshot_core::updaters::worklet_ref(#index)),
                        "gesture" => quote!(::snapshot_core::updaters::gesture(#index)),
                        other => match event_prop(other) {
                            Some((event_type, event)) => {
                                quote!(::snapshot_core::updaters::worklet_event(#index, #event_type, #event))
                            }
                            None => {
                                return Err(syn::Error::new(
                                    attr.span,
                                    format!("unknown main-thread attribute `{name}`"),
                                ))
                            }
                        },
                    }
                } else if let Some((event_type, event)) = event_prop(name) {
                    quote!(::snapshot_core::updaters::event(#index, #event_type, #event))
                } else if let Some(key) = name.strip_prefix("data-") {
                    quote!(::snapshot_core::updaters::dataset(#index, #key))
                } else {
                    match name {
                        "class" | "className" => quote!(::snapshot_core::updaters::class(#index)),
                        "style" => quote!(::snapshot_core::updaters::style(#index)),
                        "id" => quote!(::snapshot_core::updaters::id(#index)),
                        "ref" => quote!(::snapshot_core::updaters::reference(#index)),
                        _ => quote!(::snapshot_core::updaters::attribute(#index, #name)),
                    }
                };
                self.updaters.push(updater);
            }
        }
        Ok(())
    }
}

impl TemplateInput {
    fn expand(&self) -> syn::Result<TokenStream2> {
        let mut codegen = Codegen::default();
        match &self.root {
            Node::Children(span) | Node::Slot(span) => {
                return Err(syn::Error::new(*span, "the root must be an element"));
            }
            root => codegen.node(root, None)?,
        }
        let Codegen {
            statements,
            handles,
            updaters,
            slots,
            ..
        } = codegen;
        let id = &self.id;
        let count = handles.len();
        let css_id = self.css_id.as_ref().map(|css_id| quote!(.css_id(#css_id)));
        let entry = self.entry.as_ref().map(|entry| quote!(.entry(#entry)));
        Ok(quote! {
            ::snapshot_core::SnapshotTemplate::builder(#id)
                .element_count(#count)
                #css_id
                #entry
                .create(|__native: &mut dyn ::snapshot_core::NativeApi| {
                    #(#statements)*
                    ::std::vec![#(#handles),*]
                })
                #(.updater(#updaters))*
                #(#slots)*
        })
    }
}
