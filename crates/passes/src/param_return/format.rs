//! Format-string scanning for variadic argument inference.

use relift_ir::Type;

/// Argument types implied by the conversion directives of `format`.
/// Unrecognized directives degrade to the word-size integer.
pub fn variadic_arg_types(format: &str, word: Type) -> Vec<Type> {
    let mut types = Vec::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            continue;
        }

        // Flags, field width, precision.
        while matches!(
            chars.peek(),
            Some('-' | '+' | ' ' | '#' | '0' | '1'..='9' | '.' | '*')
        ) {
            chars.next();
        }

        // Length modifier.
        let mut length = String::new();
        while matches!(chars.peek(), Some('h' | 'l' | 'j' | 'z' | 't' | 'L')) {
            length.push(chars.next().unwrap());
        }

        let Some(conv) = chars.next() else {
            break;
        };
        let ty = match conv {
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' => match length.as_str() {
                "hh" => Type::I8,
                "h" => Type::I16,
                "l" | "ll" | "j" | "z" | "t" => Type::I64,
                _ => Type::I32,
            },
            's' | 'p' | 'n' => Type::I8.ptr_to(),
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' => Type::F64,
            _ => word,
        };
        types.push(ty);
    }
    types
}
