use crate::core::heap::ObjectRef;
use indexmap::IndexMap;
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Symbol(pub u32); // Interned String

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Shared slot for `&` bindings. The inner value is never itself a `Val::Ref`.
pub type Reference = Rc<RefCell<Val>>;

struct StrData {
    bytes: Box<[u8]>,
    utf8: OnceCell<bool>,
}

/// Immutable byte string. UTF-8 validity is computed on first request and cached.
#[derive(Clone)]
pub struct PhpStr(Rc<StrData>);

impl PhpStr {
    pub fn new(bytes: Vec<u8>) -> Self {
        PhpStr(Rc::new(StrData {
            bytes: bytes.into_boxed_slice(),
            utf8: OnceCell::new(),
        }))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    pub fn is_utf8(&self) -> bool {
        *self
            .0
            .utf8
            .get_or_init(|| std::str::from_utf8(&self.0.bytes).is_ok())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.bytes).into_owned()
    }
}

impl PartialEq for PhpStr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PhpStr {}

impl Hash for PhpStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for PhpStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&str> for PhpStr {
    fn from(s: &str) -> Self {
        PhpStr::new(s.as_bytes().to_vec())
    }
}

impl From<String> for PhpStr {
    fn from(s: String) -> Self {
        PhpStr::new(s.into_bytes())
    }
}

impl From<&[u8]> for PhpStr {
    fn from(s: &[u8]) -> Self {
        PhpStr::new(s.to_vec())
    }
}

impl From<Vec<u8>> for PhpStr {
    fn from(s: Vec<u8>) -> Self {
        PhpStr::new(s)
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum ArrayKey {
    Int(i64),
    Str(PhpStr),
}

impl ArrayKey {
    /// String keys that spell a canonical decimal integer become int keys.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match canonical_int(bytes) {
            Some(i) => ArrayKey::Int(i),
            None => ArrayKey::Str(PhpStr::from(bytes)),
        }
    }

    pub fn from_str_val(s: &PhpStr) -> Self {
        match canonical_int(s.as_bytes()) {
            Some(i) => ArrayKey::Int(i),
            None => ArrayKey::Str(s.clone()),
        }
    }

    pub fn to_val(&self) -> Val {
        match self {
            ArrayKey::Int(i) => Val::Int(*i),
            ArrayKey::Str(s) => Val::String(s.clone()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ArrayKey::Int(i) => i.to_string().into_bytes(),
            ArrayKey::Str(s) => s.as_bytes().to_vec(),
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(i: i64) -> Self {
        ArrayKey::Int(i)
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::from_bytes(s.as_bytes())
    }
}

/// `"123"`, `"-5"`, `"0"`; not `"0123"`, `"+1"`, `"-0"` or anything out of range.
pub fn canonical_int(bytes: &[u8]) -> Option<i64> {
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    if digits.is_empty() || digits.len() > 20 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits[0] == b'0' && (digits.len() > 1 || bytes.len() != digits.len()) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok()
}

/// Ordered hash map with PHP's append semantics.
#[derive(Debug, Clone, Default)]
pub struct ArrayData {
    pub map: IndexMap<ArrayKey, Val>,
    pub next_free: i64, // Next auto-increment index
}

impl ArrayData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: IndexMap::with_capacity(capacity),
            next_free: 0,
        }
    }

    pub fn from_list(values: impl IntoIterator<Item = Val>) -> Self {
        let mut arr = Self::new();
        for value in values {
            arr.push(value);
        }
        arr
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Val> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &ArrayKey) -> Option<&mut Val> {
        self.map.get_mut(key)
    }

    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or overwrite. An existing key keeps its position.
    pub fn insert(&mut self, key: ArrayKey, value: Val) -> Option<Val> {
        if let ArrayKey::Int(i) = key {
            if i >= self.next_free {
                self.next_free = i.saturating_add(1);
            }
        }
        self.map.insert(key, value)
    }

    /// Append with the next integer key. Fails once the key space is exhausted.
    pub fn push(&mut self, value: Val) -> bool {
        if self.next_free == i64::MAX && self.map.contains_key(&ArrayKey::Int(i64::MAX)) {
            return false;
        }
        let key = ArrayKey::Int(self.next_free);
        self.next_free = self.next_free.saturating_add(1);
        self.map.insert(key, value);
        true
    }

    pub fn next_index(&self) -> i64 {
        self.next_free
    }

    /// Slot for `key`, created as null when missing.
    pub fn slot_mut(&mut self, key: ArrayKey) -> &mut Val {
        if let ArrayKey::Int(i) = key {
            if i >= self.next_free {
                self.next_free = i.saturating_add(1);
            }
        }
        self.map.entry(key).or_default()
    }

    /// Append a null slot and return it, or `None` when the key space is exhausted.
    pub fn push_slot(&mut self) -> Option<&mut Val> {
        if !self.push(Val::Null) {
            return None;
        }
        self.map.last_mut().map(|(_, v)| v)
    }

    /// Remove a key, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &ArrayKey) -> Option<Val> {
        self.map.shift_remove(key)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, ArrayKey, Val> {
        self.map.iter()
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &ArrayKey> {
        self.map.keys()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &Val> {
        self.map.values()
    }

    pub fn is_list(&self) -> bool {
        self.map
            .keys()
            .enumerate()
            .all(|(i, k)| matches!(k, ArrayKey::Int(n) if *n == i as i64))
    }

    /// Rebuild with consecutive integer keys, keeping string keys.
    pub fn renumbered(&self) -> ArrayData {
        let mut out = ArrayData::with_capacity(self.len());
        for (key, value) in &self.map {
            match key {
                ArrayKey::Int(_) => {
                    out.push(value.clone());
                }
                ArrayKey::Str(_) => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        out
    }
}

/// Nested arrays are released through a work list so that a deeply nested
/// value (`$a = [$a]` in a loop) cannot overflow the native stack on drop.
impl Drop for ArrayData {
    fn drop(&mut self) {
        let mut pending: Vec<Val> = Vec::new();
        release_children(&mut self.map, &mut pending);
        while let Some(value) = pending.pop() {
            match value {
                Val::Array(arr) => {
                    if let Ok(mut inner) = Rc::try_unwrap(arr) {
                        release_children(&mut inner.map, &mut pending);
                    }
                }
                Val::Ref(cell) => {
                    if let Ok(cell) = Rc::try_unwrap(cell) {
                        pending.push(cell.into_inner());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Move out the children that may own further arrays; the rest drop here.
fn release_children(map: &mut IndexMap<ArrayKey, Val>, pending: &mut Vec<Val>) {
    for (_, value) in map.drain(..) {
        if matches!(value, Val::Array(_) | Val::Ref(_)) {
            pending.push(value);
        }
    }
}

#[derive(Clone, Default)]
pub enum Val {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(PhpStr),
    Array(Rc<ArrayData>), // Copy-on-write through Rc::make_mut
    Object(ObjectRef),
    Resource(ResourceId),
    /// Storage slot bound to a shared cell; never appears as an operand.
    Ref(Reference),
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "Null"),
            Val::Bool(b) => write!(f, "Bool({b})"),
            Val::Int(i) => write!(f, "Int({i})"),
            Val::Float(x) => write!(f, "Float({x:?})"),
            Val::String(s) => write!(f, "String({s:?})"),
            Val::Array(arr) => f.debug_map().entries(arr.map.iter()).finish(),
            Val::Object(obj) => write!(f, "Object(#{})", obj.id().handle()),
            Val::Resource(id) => write!(f, "Resource({})", id.0),
            Val::Ref(cell) => match cell.try_borrow() {
                Ok(inner) => write!(f, "Ref({inner:?})"),
                Err(_) => write!(f, "Ref(<borrowed>)"),
            },
        }
    }
}

/// Strict structural equality, used by tests and `===` on scalars.
/// Strict identity (`===`). Nested arrays are compared through a work list.
impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self.clone(), other.clone())];
        while let Some((a, b)) = pending.pop() {
            match (&a, &b) {
                (Val::Array(x), Val::Array(y)) => {
                    if Rc::ptr_eq(x, y) {
                        continue;
                    }
                    if x.len() != y.len() {
                        return false;
                    }
                    for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                        if kx != ky {
                            return false;
                        }
                        pending.push((vx.deref_val(), vy.deref_val()));
                    }
                }
                (Val::Ref(x), Val::Ref(y)) => {
                    if !Rc::ptr_eq(x, y) {
                        return false;
                    }
                }
                (Val::Ref(cell), plain) | (plain, Val::Ref(cell)) => match cell.try_borrow() {
                    Ok(inner) => pending.push((inner.clone(), plain.clone())),
                    Err(_) => return false,
                },
                _ => {
                    if !scalar_identical(&a, &b) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn scalar_identical(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Null, Val::Null) => true,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        (Val::Int(x), Val::Int(y)) => x == y,
        (Val::Float(x), Val::Float(y)) => x == y,
        (Val::String(x), Val::String(y)) => x == y,
        (Val::Object(x), Val::Object(y)) => x.ptr_eq(y),
        (Val::Resource(x), Val::Resource(y)) => x == y,
        _ => false,
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::String(PhpStr::from(s))
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::String(PhpStr::from(s))
    }
}

impl From<Vec<u8>> for Val {
    fn from(s: Vec<u8>) -> Self {
        Val::String(PhpStr::new(s))
    }
}

impl From<i64> for Val {
    fn from(i: i64) -> Self {
        Val::Int(i)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<f64> for Val {
    fn from(f: f64) -> Self {
        Val::Float(f)
    }
}

impl From<ArrayData> for Val {
    fn from(arr: ArrayData) -> Self {
        Val::Array(Rc::new(arr))
    }
}

impl Val {
    pub fn new_ref(value: Val) -> Reference {
        Rc::new(RefCell::new(value.deref_val()))
    }

    pub fn empty_array() -> Val {
        Val::Array(Rc::new(ArrayData::new()))
    }

    /// The value itself, looking through a reference slot.
    pub fn deref_val(&self) -> Val {
        match self {
            Val::Ref(cell) => match cell.try_borrow() {
                Ok(inner) => inner.clone(),
                Err(_) => Val::Null,
            },
            other => other.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Val::Null => true,
            Val::Ref(cell) => cell.try_borrow().map(|v| v.is_null()).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Val::Ref(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::String(_) => "string",
            Val::Array(_) => "array",
            Val::Object(_) => "object",
            Val::Resource(_) => "resource",
            Val::Ref(cell) => cell.try_borrow().map(|v| v.type_name()).unwrap_or("null"),
        }
    }

    /// Name used by `gettype()`.
    pub fn gettype_name(&self) -> &'static str {
        match self {
            Val::Null => "NULL",
            Val::Bool(_) => "boolean",
            Val::Int(_) => "integer",
            Val::Float(_) => "double",
            Val::String(_) => "string",
            Val::Array(_) => "array",
            Val::Object(_) => "object",
            Val::Resource(_) => "resource",
            Val::Ref(cell) => cell
                .try_borrow()
                .map(|v| v.gettype_name())
                .unwrap_or("NULL"),
        }
    }

    pub fn as_array(&self) -> Option<&Rc<ArrayData>> {
        match self {
            Val::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Val::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Val::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::String(s) => !(s.is_empty() || s.as_bytes() == b"0"),
            Val::Array(arr) => !arr.is_empty(),
            Val::Object(_) | Val::Resource(_) => true,
            Val::Ref(cell) => cell.try_borrow().map(|v| v.to_bool()).unwrap_or(false),
        }
    }

    pub fn to_int(&self) -> i64 {
        match self {
            Val::Null => 0,
            Val::Bool(b) => *b as i64,
            Val::Int(i) => *i,
            Val::Float(f) => float_to_int(*f),
            Val::String(s) => match parse_numeric_prefix(s.as_bytes()) {
                Some((Number::Int(i), _)) => i,
                Some((Number::Float(f), _)) => float_to_int(f),
                None => 0,
            },
            Val::Array(arr) => !arr.is_empty() as i64,
            Val::Object(_) => 1,
            Val::Resource(id) => id.0 as i64,
            Val::Ref(cell) => cell.try_borrow().map(|v| v.to_int()).unwrap_or(0),
        }
    }

    pub fn to_float(&self) -> f64 {
        match self {
            Val::Null => 0.0,
            Val::Bool(b) => *b as i64 as f64,
            Val::Int(i) => *i as f64,
            Val::Float(f) => *f,
            Val::String(s) => match parse_numeric_prefix(s.as_bytes()) {
                Some((n, _)) => n.to_float(),
                None => 0.0,
            },
            Val::Array(arr) => !arr.is_empty() as i64 as f64,
            Val::Object(_) => 1.0,
            Val::Resource(id) => id.0 as f64,
            Val::Ref(cell) => cell.try_borrow().map(|v| v.to_float()).unwrap_or(0.0),
        }
    }

    /// String form of a scalar with the given float precision. Arrays, objects
    /// and resources need the VM and return `None`.
    pub fn scalar_to_bytes(&self, precision: i64) -> Option<Vec<u8>> {
        match self {
            Val::Null => Some(Vec::new()),
            Val::Bool(true) => Some(b"1".to_vec()),
            Val::Bool(false) => Some(Vec::new()),
            Val::Int(i) => Some(i.to_string().into_bytes()),
            Val::Float(f) => Some(format_float(*f, precision).into_bytes()),
            Val::String(s) => Some(s.as_bytes().to_vec()),
            Val::Ref(cell) => cell.try_borrow().ok()?.scalar_to_bytes(precision),
            Val::Array(_) | Val::Object(_) | Val::Resource(_) => None,
        }
    }

    /// Integer or float view used by arithmetic, with whether the input was
    /// fully numeric. `None` means the value is not numeric at all.
    pub fn to_number(&self) -> Option<(Number, bool)> {
        match self {
            Val::Null => Some((Number::Int(0), true)),
            Val::Bool(b) => Some((Number::Int(*b as i64), true)),
            Val::Int(i) => Some((Number::Int(*i), true)),
            Val::Float(f) => Some((Number::Float(*f), true)),
            Val::String(s) => parse_numeric_prefix(s.as_bytes()),
            Val::Ref(cell) => cell.try_borrow().ok()?.to_number(),
            Val::Array(_) | Val::Object(_) | Val::Resource(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_float(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_val(self) -> Val {
        match self {
            Number::Int(i) => Val::Int(i),
            Number::Float(f) => Val::Float(f),
        }
    }
}

/// Float to int: NaN and infinities give 0, other out-of-range values wrap modulo 2^64.
pub fn float_to_int(f: f64) -> i64 {
    if !f.is_finite() {
        return 0;
    }
    let truncated = f.trunc();
    if truncated >= -9.223_372_036_854_775_808e18 && truncated < 9.223_372_036_854_775_808e18 {
        return truncated as i64;
    }
    let modulus = 18_446_744_073_709_551_616.0_f64;
    let mut wrapped = truncated % modulus;
    if wrapped < 0.0 {
        wrapped += modulus;
    }
    (wrapped as u64) as i64
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
}

/// Whole-string numeric check: optional surrounding whitespace, sign, digits,
/// fraction and exponent.
pub fn parse_numeric(bytes: &[u8]) -> Option<Number> {
    match parse_numeric_prefix(bytes) {
        Some((n, true)) => Some(n),
        _ => None,
    }
}

/// Leading-numeric parse. The flag is true when nothing but whitespace
/// follows the number.
pub fn parse_numeric_prefix(bytes: &[u8]) -> Option<(Number, bool)> {
    let mut i = 0;
    while i < bytes.len() && is_ws(bytes[i]) {
        i += 1;
    }
    let start = i;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut is_float = false;
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        frac_digits = j - i - 1;
        if int_digits > 0 || frac_digits > 0 {
            is_float = true;
            i = j;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }
    let end = i;
    while i < bytes.len() && is_ws(bytes[i]) {
        i += 1;
    }
    let whole = i == bytes.len();
    let text = std::str::from_utf8(&bytes[start..end]).ok()?;
    let number = if is_float {
        Number::Float(text.parse::<f64>().ok()?)
    } else {
        match text.parse::<i64>() {
            Ok(n) => Number::Int(n),
            Err(_) => Number::Float(text.parse::<f64>().ok()?),
        }
    };
    Some((number, whole))
}

/// A normal power of two other than the smallest, where the spacing of
/// neighbouring floats changes.
fn on_binade_boundary(f: f64) -> bool {
    const MANTISSA: u64 = (1 << 52) - 1;
    let bits = f.abs().to_bits();
    let exponent = bits >> 52;
    bits & MANTISSA == 0 && exponent > 1 && exponent < 0x7ff
}

/// Format a float the way PHP does. `precision` is the number of significant
/// digits; a negative value asks for the shortest round-trip form.
pub fn format_float(f: f64, precision: i64) -> String {
    if f.is_nan() {
        return "NAN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let (shortest, limit) = if precision < 0 {
        (true, 17)
    } else {
        (false, precision.clamp(1, 40) as usize)
    };
    let sci = if shortest && !on_binade_boundary(f) {
        format!("{:e}", f.abs())
    } else if shortest {
        // The gap below a power of two is half the gap above it. The
        // shortest-digits search settles for 17 digits there.
        format!("{:.16e}", f.abs())
    } else {
        format!("{:.*e}", limit - 1, f.abs())
    };
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i64 = exponent.parse().unwrap_or(0);
    let mut digits: Vec<u8> = mantissa.bytes().filter(u8::is_ascii_digit).collect();
    while digits.len() > 1 && digits.last() == Some(&b'0') {
        digits.pop();
    }
    // Position of the decimal point relative to the digit string.
    let decpt = exponent + 1;
    let mut out = String::new();
    if f < 0.0 {
        out.push('-');
    }

    if decpt < -3 || decpt > limit as i64 {
        out.push(digits[0] as char);
        out.push('.');
        if digits.len() > 1 {
            out.extend(digits[1..].iter().map(|&d| d as char));
        } else {
            out.push('0');
        }
        out.push('E');
        out.push(if exponent < 0 { '-' } else { '+' });
        out.push_str(&exponent.abs().to_string());
    } else if decpt <= 0 {
        out.push_str("0.");
        for _ in 0..(-decpt) {
            out.push('0');
        }
        out.extend(digits.iter().map(|&d| d as char));
    } else {
        let point = decpt as usize;
        for i in 0..point.max(digits.len()) {
            if i == point {
                out.push('.');
            }
            out.push(digits.get(i).map(|&d| d as char).unwrap_or('0'));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_are_normalized() {
        assert_eq!(ArrayKey::from_bytes(b"12"), ArrayKey::Int(12));
        assert_eq!(ArrayKey::from_bytes(b"-3"), ArrayKey::Int(-3));
        assert!(matches!(ArrayKey::from_bytes(b"012"), ArrayKey::Str(_)));
        assert!(matches!(ArrayKey::from_bytes(b"-0"), ArrayKey::Str(_)));
        assert!(matches!(ArrayKey::from_bytes(b"1.5"), ArrayKey::Str(_)));
        assert!(matches!(
            ArrayKey::from_bytes(b"99999999999999999999"),
            ArrayKey::Str(_)
        ));
    }

    #[test]
    fn unset_then_write_appends_at_end() {
        let mut arr = ArrayData::new();
        arr.insert(ArrayKey::Int(0), Val::Int(1));
        arr.insert(ArrayKey::from("a"), Val::Int(2));
        arr.remove(&ArrayKey::Int(0));
        arr.insert(ArrayKey::Int(0), Val::Int(3));
        let keys: Vec<_> = arr.keys().cloned().collect();
        assert_eq!(keys, vec![ArrayKey::from("a"), ArrayKey::Int(0)]);
        assert_eq!(arr.next_index(), 1);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut arr = ArrayData::from_list([Val::Int(1), Val::Int(2)]);
        arr.insert(ArrayKey::Int(0), Val::Int(9));
        assert_eq!(arr.values().next(), Some(&Val::Int(9)));
    }

    #[test]
    fn numeric_strings() {
        assert_eq!(parse_numeric(b" 12 "), Some(Number::Int(12)));
        assert_eq!(parse_numeric(b"1e3"), Some(Number::Float(1000.0)));
        assert_eq!(parse_numeric(b".5"), Some(Number::Float(0.5)));
        assert_eq!(parse_numeric(b"12abc"), None);
        assert_eq!(
            parse_numeric_prefix(b"12abc"),
            Some((Number::Int(12), false))
        );
        assert_eq!(parse_numeric_prefix(b"abc"), None);
        assert_eq!(parse_numeric_prefix(b"."), None);
        assert_eq!(
            parse_numeric(b"9223372036854775808"),
            Some(Number::Float(9.223372036854775808e18))
        );
    }

    #[test]
    fn float_to_int_edges() {
        assert_eq!(float_to_int(f64::NAN), 0);
        assert_eq!(float_to_int(f64::INFINITY), 0);
        assert_eq!(float_to_int(-3.9), -3);
        assert_eq!(float_to_int(1.8446744073709552e19 + 4096.0), 4096);
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(0.1 + 0.2, 14), "0.3");
        assert_eq!(format_float(0.1 + 0.2, -1), "0.30000000000000004");
        assert_eq!(format_float(1.0, 14), "1");
        assert_eq!(format_float(-1.5, 14), "-1.5");
        assert_eq!(format_float(1e15, 14), "1.0E+15");
        assert_eq!(format_float(123456789012345.0, -1), "123456789012345");
        assert_eq!(format_float(0.00001, 14), "1.0E-5");
        assert_eq!(format_float(0.0001, 14), "0.0001");
        assert_eq!(format_float(1e25, -1), "1.0E+25");
        assert_eq!(format_float(f64::INFINITY, 14), "INF");
        assert_eq!(format_float(-0.0, 14), "-0");
    }

    #[test]
    fn shortest_form_at_powers_of_two() {
        assert_eq!(format_float(9.223372036854775808e18, -1), "9.2233720368547758E+18");
        assert_eq!(format_float(-9.223372036854775808e18, -1), "-9.2233720368547758E+18");
        assert_eq!(format_float(0.5, -1), "0.5");
        assert_eq!(format_float(1024.0, -1), "1024");
        assert_eq!(format_float(0.125, -1), "0.125");
        assert_eq!(format_float(9.223372036854775808e18, 14), "9.2233720368548E+18");
    }

    #[test]
    fn utf8_flag_is_lazy_and_cached() {
        let s = PhpStr::new(vec![0xff, b'a']);
        assert!(!s.is_utf8());
        assert!(PhpStr::from("héllo").is_utf8());
    }
}
