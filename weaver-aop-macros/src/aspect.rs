//! `#[aspect]` 宏实现
//!
//! 扫描 impl 块中带通知属性的方法，生成 `AspectType` 实现并提交到 inventory

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::meta::ParseNestedMeta;
use syn::{Attribute, Error, Expr, FnArg, ImplItem, ImplItemFn, ItemImpl, LitStr, PatType, Result};

use crate::utils::{is_anyhow_error, param_ident, referent, returns_result};

/// 方法上可以使用的属性
const METHOD_ATTRS: &[&str] = &[
    "pointcut",
    "before",
    "after",
    "around",
    "after_returning",
    "after_throwing",
    "declare_parents",
];

/// `#[aspect(...)]` 参数
#[derive(Default)]
pub struct AspectArgs {
    name: Option<LitStr>,
    order: Option<Expr>,
    per: Option<LitStr>,
}

impl AspectArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("name") {
            self.name = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("order") {
            self.order = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("per") {
            self.per = Some(meta.value()?.parse()?);
        } else {
            return Err(meta.error("unsupported aspect property, expected `name`, `order` or `per`"));
        }
        Ok(())
    }
}

pub fn impl_aspect(args: AspectArgs, mut input: ItemImpl) -> Result<TokenStream> {
    if input.trait_.is_some() {
        return Err(Error::new_spanned(
            &input.self_ty,
            "#[aspect] must be applied to an inherent impl block",
        ));
    }
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "#[aspect] cannot be applied to a generic impl block",
        ));
    }

    let self_ty = input.self_ty.clone();
    let mut steps = Vec::new();
    for item in &mut input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        if let Some((kind, attr)) = take_method_attr(method)? {
            steps.push(expand_method(&kind, &attr, method)?);
        }
    }

    let name = args.name.map(|name| quote! { .name(#name) });
    let order = args.order.map(|order| quote! { .order(#order) });
    let per = args.per.map(|per| quote! { .per_clause(#per) });

    Ok(quote! {
        #input

        impl ::weaver_aop::AspectType for #self_ty {
            fn aspect_class() -> ::weaver_aop::AspectClass {
                ::weaver_aop::AspectClass::builder::<Self>()
                    #name
                    #order
                    #per
                    #(#steps)*
                    .build()
            }
        }

        ::weaver_aop::inventory::submit! {
            ::weaver_aop::AspectRegistration::new(
                <#self_ty as ::weaver_aop::AspectType>::aspect_class
            )
        }
    })
}

/// 取出方法上的切面属性（每个方法至多一个）
fn take_method_attr(method: &mut ImplItemFn) -> Result<Option<(String, Attribute)>> {
    let mut found: Option<(String, Attribute)> = None;
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        let kind = METHOD_ATTRS
            .iter()
            .find(|kind| attr.path().is_ident(kind))
            .map(|kind| kind.to_string());
        match kind {
            Some(_) if found.is_some() => {
                return Err(Error::new_spanned(
                    &attr,
                    "only one aspect attribute is allowed per method",
                ));
            }
            Some(kind) => found = Some((kind, attr)),
            None => kept.push(attr),
        }
    }
    method.attrs = kept;
    Ok(found)
}

fn expand_method(kind: &str, attr: &Attribute, method: &ImplItemFn) -> Result<TokenStream> {
    match kind {
        "pointcut" => {
            let name = method.sig.ident.to_string();
            let expression: LitStr = attr.parse_args()?;
            Ok(quote! { .pointcut(#name, #expression) })
        }
        "declare_parents" => expand_declare_parents(attr, method),
        _ => expand_advice(kind, attr, method),
    }
}

/// `#[declare_parents(interface = "..", types_matching = "..")]` 标记一个无参关联函数，
/// 函数返回值即默认实现
fn expand_declare_parents(attr: &Attribute, method: &ImplItemFn) -> Result<TokenStream> {
    if method.sig.receiver().is_some() || !method.sig.inputs.is_empty() {
        return Err(Error::new_spanned(
            &method.sig,
            "#[declare_parents] must be placed on an associated function without parameters",
        ));
    }

    let mut interface: Option<LitStr> = None;
    let mut types_matching: Option<LitStr> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("interface") {
            interface = Some(meta.value()?.parse()?);
        } else if meta.path.is_ident("types_matching") || meta.path.is_ident("value") {
            types_matching = Some(meta.value()?.parse()?);
        } else {
            return Err(meta.error("unsupported declare_parents property"));
        }
        Ok(())
    })?;
    let interface = interface
        .ok_or_else(|| Error::new_spanned(attr, "#[declare_parents] requires `interface`"))?;
    let types_matching = types_matching
        .ok_or_else(|| Error::new_spanned(attr, "#[declare_parents] requires `types_matching`"))?;

    let field = method.sig.ident.to_string();
    let factory = &method.sig.ident;
    Ok(quote! {
        .declare_parents(
            #field,
            ::weaver_aop::DeclareParents::new(#interface, #types_matching).default_impl(Self::#factory),
        )
    })
}

/// 通知属性：切点表达式与可选的参数绑定
fn parse_advice_attr(kind: &str, attr: &Attribute) -> Result<(LitStr, Option<LitStr>)> {
    if let Ok(expression) = attr.parse_args::<LitStr>() {
        return Ok((expression, None));
    }

    let binding_key = match kind {
        "after_returning" => Some("returning"),
        "after_throwing" => Some("throwing"),
        _ => None,
    };
    let mut pointcut: Option<LitStr> = None;
    let mut binding: Option<LitStr> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("pointcut") || meta.path.is_ident("value") {
            pointcut = Some(meta.value()?.parse()?);
        } else if binding_key.is_some_and(|key| meta.path.is_ident(key)) {
            binding = Some(meta.value()?.parse()?);
        } else {
            return Err(meta.error(format!("unsupported {} property", kind)));
        }
        Ok(())
    })?;

    let pointcut = pointcut.ok_or_else(|| {
        Error::new_spanned(attr, format!("#[{}] requires a pointcut expression", kind))
    })?;
    Ok((pointcut, binding))
}

fn expand_advice(kind: &str, attr: &Attribute, method: &ImplItemFn) -> Result<TokenStream> {
    let receiver = method.sig.receiver().ok_or_else(|| {
        Error::new_spanned(&method.sig, format!("#[{}] method must take `&self`", kind))
    })?;
    if receiver.reference.is_none() || receiver.mutability.is_some() {
        return Err(Error::new_spanned(
            receiver,
            format!("#[{}] method must take `&self`", kind),
        ));
    }

    let params: Vec<&PatType> = method
        .sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(param) => Some(param),
            FnArg::Receiver(_) => None,
        })
        .collect();
    let (pointcut, binding) = parse_advice_attr(kind, attr)?;
    let name = method.sig.ident.to_string();
    let ident = &method.sig.ident;
    let fallible = returns_result(&method.sig.output);

    let finish = |call: TokenStream| {
        if fallible {
            quote! { ::std::result::Result::Ok(#call?) }
        } else {
            quote! {{ #call; ::std::result::Result::Ok(()) }}
        }
    };

    match (kind, params.len()) {
        ("before" | "after" | "after_returning", 0 | 1) if binding.is_none() => {
            let builder = format_ident!("{}", kind);
            let (jp, call) = if params.is_empty() {
                (quote!(_jp), quote!(aspect.#ident()))
            } else {
                (quote!(jp), quote!(aspect.#ident(jp)))
            };
            let body = finish(call);
            Ok(quote! {
                .#builder(#name, #pointcut, |aspect: &Self, #jp: &::weaver_aop::JoinPoint<'_>| #body)
            })
        }
        ("around", 1) => {
            let body = if fallible {
                quote! { ::std::result::Result::Ok(aspect.#ident(pjp)?) }
            } else {
                quote! { ::std::result::Result::Ok(aspect.#ident(pjp)) }
            };
            Ok(quote! {
                .around(#name, #pointcut, |aspect: &Self, pjp| #body)
            })
        }
        ("after_returning", 2) => {
            let binding = binding.ok_or_else(|| {
                Error::new_spanned(
                    attr,
                    "declare `returning = \"<param>\"` to bind the returned value",
                )
            })?;
            let value_ty = bound_param_type(params[1], &binding)?;
            let body = finish(quote!(aspect.#ident(jp, value)));
            Ok(quote! {
                .after_returning_bound::<#value_ty, _>(#name, #pointcut, #binding, |aspect: &Self, jp, value| #body)
            })
        }
        ("after_throwing", 0 | 1) if binding.is_none() => {
            let call = if params.is_empty() {
                quote!(aspect.#ident())
            } else {
                quote!(aspect.#ident(jp))
            };
            let body = finish(call);
            Ok(quote! {
                .after_throwing(#name, #pointcut, |aspect: &Self, jp, _error| {
                    let _ = jp;
                    #body
                })
            })
        }
        ("after_throwing", 2) => {
            let body = finish(quote!(aspect.#ident(jp, error)));
            match binding {
                Some(binding) => {
                    let error_ty = bound_param_type(params[1], &binding)?;
                    if is_anyhow_error(error_ty) {
                        Ok(quote! {
                            .after_throwing(#name, #pointcut, |aspect: &Self, jp, error| #body)
                        })
                    } else {
                        Ok(quote! {
                            .after_throwing_bound::<#error_ty, _>(#name, #pointcut, #binding, |aspect: &Self, jp, error| #body)
                        })
                    }
                }
                None => Ok(quote! {
                    .after_throwing(#name, #pointcut, |aspect: &Self, jp, error| #body)
                }),
            }
        }
        _ => Err(Error::new_spanned(
            &method.sig,
            format!("unsupported parameter list for #[{}] advice", kind),
        )),
    }
}

/// 绑定参数的名称必须与属性一致，类型必须是引用
fn bound_param_type<'a>(param: &'a PatType, binding: &LitStr) -> Result<&'a syn::Type> {
    let matches = param_ident(param)
        .map(|ident| *ident == binding.value())
        .unwrap_or(false);
    if !matches {
        return Err(Error::new_spanned(
            binding,
            format!("binding '{}' does not match the advice parameter", binding.value()),
        ));
    }
    referent(&param.ty).ok_or_else(|| {
        Error::new_spanned(&param.ty, "bound advice parameter must be a reference")
    })
}
